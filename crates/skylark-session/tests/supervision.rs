// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end supervision scenarios over mock clients and a real history
//! store.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use skylark_bus::SupervisorEvent;
use skylark_core::types::{ArchivePage, ConnectionState, LastError, PeerCertificate};
use skylark_core::{AccountDirectory, BareJid, Jid, MessageStanza, ProtocolClient, ProtocolEvent};
use skylark_session::EnsureOutcome;
use skylark_test_utils::{LoginBehavior, TestHarness};

fn jid(s: &str) -> BareJid {
    BareJid::new(s).unwrap()
}

fn full(s: &str) -> Jid {
    s.parse().unwrap()
}

#[tokio::test]
async fn live_messages_reach_the_store() {
    let harness = TestHarness::builder()
        .with_account("me@example.org", false)
        .build()
        .await
        .unwrap();
    harness.go_online().await;
    let me = jid("me@example.org");
    let client = harness.client(&me).unwrap();

    let message = MessageStanza::chat(full("alice@example.org/phone"), full("me@example.org/skylark"), "hi")
        .with_id("m1");
    client
        .emit(ProtocolEvent::MessageReceived {
            account: me.clone(),
            own_jid: Some(full("me@example.org/skylark")),
            message: message.clone(),
        })
        .await;
    // Same stanza again is deduplicated.
    client
        .emit(ProtocolEvent::MessageReceived {
            account: me.clone(),
            own_jid: Some(full("me@example.org/skylark")),
            message,
        })
        .await;

    let alice = jid("alice@example.org");
    assert_eq!(harness.store.count(&me, &alice).await.unwrap(), 1);
    assert_eq!(harness.store.count_unread_conversations().await.unwrap(), 1);
    assert!(harness.store.mark_all_read(&me, &alice).await.unwrap());
    assert_eq!(harness.store.count_unread_conversations().await.unwrap(), 0);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn fresh_session_replays_archive_into_store() {
    let harness = TestHarness::builder()
        .with_account("me@example.org", false)
        .with_config(|c| c.sync.automatic = true)
        .build()
        .await
        .unwrap();
    let me = jid("me@example.org");
    assert_eq!(harness.supervisor.ensure(&me).await.unwrap(), EnsureOutcome::Created);

    let client = harness.client(&me).unwrap();
    let now = Utc::now();
    let archived = |minutes: i64, body: &str| ProtocolEvent::ArchiveMessageReceived {
        account: me.clone(),
        timestamp: now - ChronoDuration::minutes(minutes),
        message: MessageStanza::chat(full("bob@example.org/laptop"), full("me@example.org"), body),
    };
    client.push_archive_batch(
        ArchivePage {
            received: 2,
            first: Some("c1".into()),
            index: Some(0),
        },
        vec![archived(10, "older"), archived(5, "newer")],
    );

    harness.go_online().await;
    harness.settle().await;

    let bob = jid("bob@example.org");
    assert_eq!(client.archive_queries().len(), 1);
    assert_eq!(harness.store.count(&me, &bob).await.unwrap(), 2);
    let page = harness.store.page(&me, &bob, 10, 0).await.unwrap();
    assert_eq!(page[0].body, "newer");
    assert_eq!(
        harness.store.last_message_time(&me).await.unwrap().map(|t| t.timestamp()),
        Some((now - ChronoDuration::minutes(5)).timestamp())
    );
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_certificate_can_be_accepted_and_retried() {
    let chain = vec![
        PeerCertificate {
            der: b"self-signed".to_vec(),
            subject: "example.org".into(),
        },
    ];
    let harness = TestHarness::builder()
        .with_account("me@example.org", false)
        .with_platform_trust(false)
        .with_login_behavior(LoginBehavior::Tls(chain))
        .build()
        .await
        .unwrap();
    let mut events = harness.subscribe();
    let me = jid("me@example.org");

    harness.go_online().await;
    harness.settle().await;

    let config = harness.directory.config(&me).unwrap();
    assert!(!config.active);
    assert!(config.server_certificate.is_some());
    assert_eq!(harness.directory.last_error(&me), Some(LastError::Certificate));
    let mut rejected = false;
    while let Ok(envelope) = events.try_recv() {
        rejected |= matches!(envelope.payload, SupervisorEvent::CertificateRejected { .. });
    }
    assert!(rejected);

    // The user reviews and accepts the certificate, then re-enables.
    assert!(harness.directory.accept_certificate(&me));
    harness.directory.set_active(&me, true);
    assert_eq!(harness.supervisor.ensure(&me).await.unwrap(), EnsureOutcome::LoginStarted);
    let client = harness.client(&me).unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.login_count(), 2);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn accounts_are_supervised_independently() {
    let harness = TestHarness::builder()
        .with_account("a@example.org", false)
        .with_account("b@example.org", false)
        .build()
        .await
        .unwrap();
    harness.go_online().await;
    let a = jid("a@example.org");
    let b = jid("b@example.org");
    assert_eq!(harness.supervisor.accounts().await, vec![a.clone(), b.clone()]);

    let client_a = harness.client(&a).unwrap();
    client_a.set_login_behavior(LoginBehavior::AuthFail(
        skylark_core::types::AuthFailure::NotAuthorized,
    ));
    client_a.disconnect(true).await;
    harness.settle().await;

    // a was disconnected, re-logged in, failed auth and got deactivated.
    assert!(!harness.directory.config(&a).unwrap().active);
    assert_eq!(harness.directory.last_error(&a), Some(LastError::Auth));
    // b is untouched.
    let client_b = harness.client(&b).unwrap();
    assert_eq!(client_b.state(), ConnectionState::Connected);
    assert_eq!(client_b.login_count(), 1);
    assert!(harness.directory.config(&b).unwrap().active);
    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_login_is_retried_after_backoff() {
    let harness = TestHarness::builder()
        .with_account("me@example.org", false)
        .with_login_behavior(LoginBehavior::Error)
        .build()
        .await
        .unwrap();
    let me = jid("me@example.org");
    harness.go_online().await;
    harness.settle().await;

    let client = harness.client(&me).unwrap();
    assert_eq!(client.login_count(), 3);
    let snapshot = harness.supervisor.snapshot(&me).await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.retry, 3);
    assert!(snapshot.reconnect_pending);

    // The server is reachable again before the 5 s retry fires.
    client.set_login_behavior(LoginBehavior::Establish);
    tokio::time::sleep(Duration::from_secs(5)).await;
    harness.settle().await;

    assert_eq!(client.login_count(), 4);
    assert_eq!(client.state(), ConnectionState::Connected);
    let snapshot = harness.supervisor.snapshot(&me).await.unwrap();
    assert_eq!(snapshot.retry, 0);
    assert!(!snapshot.reconnect_pending);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn stalled_login_does_not_hold_up_other_accounts() {
    let harness = TestHarness::builder()
        .with_account("a@example.org", false)
        .with_account("b@example.org", false)
        .build()
        .await
        .unwrap();
    harness.go_online().await;
    let a = jid("a@example.org");
    let b = jid("b@example.org");
    let client_a = harness.client(&a).unwrap();
    let client_b = harness.client(&b).unwrap();

    // a's reconnect never returns.
    client_a.set_login_behavior(LoginBehavior::Hang);
    client_a.disconnect(true).await;
    harness.settle().await;
    assert_eq!(client_a.login_count(), 2);

    client_b.disconnect(true).await;
    harness.settle().await;
    assert_eq!(client_b.login_count(), 2);
    assert_eq!(client_b.state(), ConnectionState::Connected);
    harness.shutdown().await.unwrap();
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! History store integration tests: protocol events routed through a
//! handler registry, notifications, the unread badge and persistence across
//! reopen.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use skylark_bus::{ChatAction, HandlerRegistry, HistoryEvent};
use skylark_config::SkylarkConfig;
use skylark_core::events::{StanzaError, StanzaKind};
use skylark_core::types::MessageState;
use skylark_core::{BareJid, EventKind, EventRegistry, MessageStanza, ProtocolEvent};
use skylark_storage::{ChatHistoryStore, HistoryEventHandler, UnreadBadge};
use tempfile::TempDir;

fn config(dir: &TempDir) -> SkylarkConfig {
    let mut config = SkylarkConfig::default();
    config.storage.database_path = dir.path().join("history.db").to_string_lossy().into_owned();
    config
}

fn jid(s: &str) -> BareJid {
    BareJid::new(s).unwrap()
}

fn incoming(body: &str, id: &str, minute: u32) -> ProtocolEvent {
    let mut message = MessageStanza::chat(
        "alice@example.org/phone".parse().unwrap(),
        "me@example.org/skylark".parse().unwrap(),
        body,
    )
    .with_id(id);
    message.delay = Some(Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0).unwrap());
    ProtocolEvent::MessageReceived {
        account: jid("me@example.org"),
        own_jid: Some("me@example.org/skylark".parse().unwrap()),
        message,
    }
}

fn outgoing(body: &str, id: &str) -> ProtocolEvent {
    let message = MessageStanza::chat(
        "me@example.org/skylark".parse().unwrap(),
        "alice@example.org".parse().unwrap(),
        body,
    )
    .with_id(id);
    ProtocolEvent::MessageReceived {
        account: jid("me@example.org"),
        own_jid: Some("me@example.org/skylark".parse().unwrap()),
        message,
    }
}

async fn wait_for(badge: &UnreadBadge, expected: u64) {
    let mut rx = badge.watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|count| *count == expected))
        .await
        .expect("badge did not reach expected count")
        .unwrap();
}

#[tokio::test]
async fn events_flow_from_registry_into_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ChatHistoryStore::open(&config(&dir)).await.unwrap());
    let mut notifications = store.subscribe();
    let registry = HandlerRegistry::new();
    registry.register(
        Arc::new(HistoryEventHandler::new(Arc::clone(&store))),
        &EventKind::HISTORY,
    );

    assert_eq!(registry.dispatch(&incoming("hello", "in-1", 0)).await, 1);
    registry.dispatch(&outgoing("hi back", "out-1")).await;
    registry
        .dispatch(&ProtocolEvent::DeliveryReceiptReceived {
            account: jid("me@example.org"),
            from: jid("alice@example.org"),
            stanza_id: "out-1".into(),
        })
        .await;

    let me = jid("me@example.org");
    let alice = jid("alice@example.org");
    let entries = store.page(&me, &alice, 10, 0).await.unwrap();
    assert_eq!(entries.len(), 2);
    let sent = entries.iter().find(|e| e.body == "hi back").unwrap();
    assert_eq!(sent.state, MessageState::OutgoingDelivered);

    // Notifications arrive in mutation order.
    let first = notifications.recv().await.unwrap().payload;
    assert!(matches!(first, HistoryEvent::MessageNew { ref body, .. } if body == "hello"));
    let second = notifications.recv().await.unwrap().payload;
    assert!(matches!(second, HistoryEvent::MessageNew { ref body, .. } if body == "hi back"));
    let third = notifications.recv().await.unwrap().payload;
    assert!(matches!(third, HistoryEvent::MessageUpdated { .. }));
}

#[tokio::test]
async fn error_reply_marks_sent_message_failed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ChatHistoryStore::open(&config(&dir)).await.unwrap());
    let handler = HistoryEventHandler::new(Arc::clone(&store));
    handler.apply(&outgoing("are you there?", "out-7")).await.unwrap();

    let mut bounce = MessageStanza::chat(
        "alice@example.org".parse().unwrap(),
        "me@example.org/skylark".parse().unwrap(),
        "are you there?",
    )
    .with_id("out-7");
    bounce.kind = StanzaKind::Error;
    bounce.error = Some(StanzaError {
        condition: Some("service-unavailable".into()),
        text: None,
    });
    handler
        .apply(&ProtocolEvent::MessageReceived {
            account: jid("me@example.org"),
            own_jid: Some("me@example.org/skylark".parse().unwrap()),
            message: bounce,
        })
        .await
        .unwrap();

    let me = jid("me@example.org");
    let alice = jid("alice@example.org");
    let entries = store.page(&me, &alice, 10, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, MessageState::OutgoingErrorUnread);
    assert_eq!(
        store.message_error(entries[0].id).await.unwrap().as_deref(),
        Some("service-unavailable")
    );
}

#[tokio::test]
async fn badge_follows_reads_and_deletes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ChatHistoryStore::open(&config(&dir)).await.unwrap());
    let handler = HistoryEventHandler::new(Arc::clone(&store));
    let badge = UnreadBadge::spawn(Arc::clone(&store)).await.unwrap();
    assert_eq!(badge.current(), 0);

    handler.apply(&incoming("one", "a", 1)).await.unwrap();
    wait_for(&badge, 1).await;

    let me = jid("me@example.org");
    let alice = jid("alice@example.org");
    let mut notifications = store.subscribe();
    assert!(store.mark_all_read(&me, &alice).await.unwrap());
    wait_for(&badge, 0).await;
    assert_eq!(
        notifications.recv().await.unwrap().payload,
        HistoryEvent::ChatItemsUpdated {
            account: me.clone(),
            peer: Some(alice.clone()),
            action: ChatAction::MarkedRead,
        }
    );

    handler.apply(&incoming("two", "b", 2)).await.unwrap();
    wait_for(&badge, 1).await;
    assert_eq!(store.delete_conversation(&me, &alice).await.unwrap(), 2);
    wait_for(&badge, 0).await;
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let me = jid("me@example.org");
    let alice = jid("alice@example.org");
    {
        let store = Arc::new(ChatHistoryStore::open(&config(&dir)).await.unwrap());
        let handler = HistoryEventHandler::new(Arc::clone(&store));
        handler.apply(&incoming("kept", "k1", 3)).await.unwrap();
        store.close().await.unwrap();
    }

    let store = ChatHistoryStore::open(&config(&dir)).await.unwrap();
    assert_eq!(store.count(&me, &alice).await.unwrap(), 1);
    assert_eq!(
        store.last_message_time(&me).await.unwrap(),
        Some(Utc.with_ymd_and_hms(2026, 5, 1, 12, 3, 0).unwrap())
    );
    // The stanza is still known to duplicate detection after reopening.
    let handler = HistoryEventHandler::new(Arc::new(store));
    handler.apply(&incoming("kept", "k1", 3)).await.unwrap();
    assert_eq!(handler.store().count(&me, &alice).await.unwrap(), 1);
}

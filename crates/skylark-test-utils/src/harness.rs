// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a connection supervisor over mock clients with a
//! real history store in a temp SQLite database. History events from every
//! mock client flow into the store exactly as they would in production.

use std::sync::Arc;
use std::time::Duration;

use skylark_bus::{EventBus, SupervisorEvent};
use skylark_config::SkylarkConfig;
use skylark_core::types::AccountConfig;
use skylark_core::{BareJid, EventKind, SkylarkError};
use skylark_session::{Collaborators, ConnectionSupervisor, SessionConfig, Subscription};
use skylark_storage::{ChatHistoryStore, HistoryEventHandler};

use crate::mock_client::{LoginBehavior, MockClientFactory, MockProtocolClient};
use crate::mock_directory::{InMemoryAccountDirectory, StaticTrust};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    accounts: Vec<(AccountConfig, String)>,
    behavior: LoginBehavior,
    trusted: bool,
    config: SkylarkConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = SkylarkConfig::default();
        config.sync.automatic = false;
        Self {
            accounts: Vec::new(),
            behavior: LoginBehavior::Establish,
            trusted: true,
            config,
        }
    }

    /// Add an active account with a password.
    pub fn with_account(mut self, jid: &str, push_enabled: bool) -> Self {
        let Ok(jid) = BareJid::new(jid) else {
            panic!("invalid test account address: {jid}");
        };
        let mut config = AccountConfig::new(jid);
        config.push_enabled = push_enabled;
        self.accounts.push((config, "secret".to_string()));
        self
    }

    /// Login behavior of every created client.
    pub fn with_login_behavior(mut self, behavior: LoginBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Whether the platform trusts presented certificate chains.
    pub fn with_platform_trust(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Adjust the configuration before anything is built.
    pub fn with_config(mut self, edit: impl FnOnce(&mut SkylarkConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// Build the harness. Must run inside a Tokio runtime.
    pub async fn build(self) -> Result<TestHarness, SkylarkError> {
        let temp_dir = tempfile::TempDir::new().map_err(SkylarkError::storage)?;
        let mut config = self.config;
        config.storage.database_path = temp_dir.path().join("history.db").to_string_lossy().into_owned();

        let store = Arc::new(ChatHistoryStore::open(&config).await?);

        let directory = Arc::new(InMemoryAccountDirectory::new());
        for (account, password) in self.accounts {
            directory.insert(account, &password);
        }
        let factory = Arc::new(MockClientFactory::with_behavior(self.behavior));

        let history = Arc::new(HistoryEventHandler::new(Arc::clone(&store)));
        let events = EventBus::new(config.history.notification_capacity);
        let supervisor = ConnectionSupervisor::start(
            SessionConfig::from(&config),
            Collaborators {
                directory: directory.clone(),
                factory: factory.clone(),
                trust: Arc::new(StaticTrust::new(self.trusted)),
                watermark: store.clone(),
            },
            vec![Subscription::new(history, &EventKind::HISTORY)],
            events,
        );

        Ok(TestHarness {
            supervisor,
            store,
            directory,
            factory,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock clients and temp storage.
pub struct TestHarness {
    pub supervisor: ConnectionSupervisor,
    /// History store (temp DB, cleaned up on drop).
    pub store: Arc<ChatHistoryStore>,
    pub directory: Arc<InMemoryAccountDirectory>,
    pub factory: Arc<MockClientFactory>,
    pub config: SkylarkConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The client created for `account`, if any.
    pub fn client(&self, account: &BareJid) -> Option<Arc<MockProtocolClient>> {
        self.factory.client(account)
    }

    pub fn subscribe(
        &self,
    ) -> tokio::sync::broadcast::Receiver<skylark_bus::Envelope<SupervisorEvent>> {
        self.supervisor.events().subscribe()
    }

    /// Bring the network up, which ensures every configured account.
    pub async fn go_online(&self) {
        self.supervisor.set_network_available(true).await;
    }

    /// Let queued lifecycle events run through the supervisor task.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pub async fn shutdown(&self) -> Result<(), SkylarkError> {
        self.supervisor.shutdown().await;
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_core::ProtocolClient;
    use skylark_core::types::ConnectionState;

    #[tokio::test]
    async fn builds_and_connects_accounts() {
        let harness = TestHarness::builder()
            .with_account("me@example.org", false)
            .build()
            .await
            .unwrap();
        harness.go_online().await;

        let account = BareJid::new("me@example.org").unwrap();
        let client = harness.client(&account).unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(harness.supervisor.accounts().await, vec![account]);
        harness.shutdown().await.unwrap();
    }
}

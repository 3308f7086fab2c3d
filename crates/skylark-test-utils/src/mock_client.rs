// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable protocol client for deterministic testing.
//!
//! `MockProtocolClient` implements `ProtocolClient` without any network. Login
//! outcomes follow a configurable [`LoginBehavior`], every call is recorded
//! for assertions, and events can be injected through [`MockProtocolClient::emit`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use skylark_bus::HandlerRegistry;
use skylark_core::types::{
    ArchivePage, ArchiveQuery, AuthFailure, ClientSettings, ConnectionState, PeerCertificate,
};
use skylark_core::{
    BareJid, CertificateCheck, ClientFactory, EventRegistry, ProtocolClient, ProtocolEvent,
    SkylarkError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What `login` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginBehavior {
    /// Connect and emit `SessionEstablished`.
    Establish,
    /// Connect and emit `StreamResumed`.
    Resume,
    /// Stay in `Connecting` without emitting anything.
    Stay,
    /// Present `chain` to the certificate check; establish when accepted,
    /// emit `CertificateError` and drop otherwise.
    Tls(Vec<PeerCertificate>),
    /// Emit `AuthFailed` and drop.
    AuthFail(AuthFailure),
    /// Return a connection error from `login`.
    Error,
    /// Never return from `login`.
    Hang,
}

/// A recorded call on the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Configure,
    Login,
    Disconnect { force: bool },
    Keepalive,
    SendAck,
    SetForeground(bool),
    QueryArchive,
}

struct ScriptedPage {
    page: ArchivePage,
    events: Vec<ProtocolEvent>,
}

struct MockState {
    state: ConnectionState,
    settings: Option<ClientSettings>,
    behavior: LoginBehavior,
    calls: Vec<ClientCall>,
    logins: usize,
    disconnect_emits: bool,
    ack_supported: bool,
    pages: VecDeque<ScriptedPage>,
    queries: Vec<ArchiveQuery>,
}

/// A protocol client driven entirely by the test.
pub struct MockProtocolClient {
    account: BareJid,
    registry: Arc<HandlerRegistry>,
    certificates: Option<Arc<dyn CertificateCheck>>,
    state: Mutex<MockState>,
}

impl MockProtocolClient {
    /// A disconnected client that establishes on login.
    pub fn new(account: BareJid) -> Self {
        Self {
            account,
            registry: Arc::new(HandlerRegistry::new()),
            certificates: None,
            state: Mutex::new(MockState {
                state: ConnectionState::Disconnected,
                settings: None,
                behavior: LoginBehavior::Establish,
                calls: Vec::new(),
                logins: 0,
                disconnect_emits: true,
                ack_supported: true,
                pages: VecDeque::new(),
                queries: Vec::new(),
            }),
        }
    }

    fn with_settings(
        account: BareJid,
        settings: ClientSettings,
        certificates: Arc<dyn CertificateCheck>,
        behavior: LoginBehavior,
    ) -> Self {
        let mut client = Self::new(account);
        client.certificates = Some(certificates);
        {
            let state = client.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            state.settings = Some(settings);
            state.behavior = behavior;
        }
        client
    }

    /// The concrete registry, for dispatch-level assertions.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Deliver an event to the registered handlers.
    pub async fn emit(&self, event: ProtocolEvent) -> usize {
        self.registry.dispatch(&event).await
    }

    pub fn set_login_behavior(&self, behavior: LoginBehavior) {
        lock(&self.state).behavior = behavior;
    }

    /// Whether `disconnect` emits `Disconnected`. Defaults to `true`.
    pub fn set_disconnect_emits(&self, emits: bool) {
        lock(&self.state).disconnect_emits = emits;
    }

    /// What `send_ack` reports. Defaults to `true`.
    pub fn set_ack_supported(&self, supported: bool) {
        lock(&self.state).ack_supported = supported;
    }

    /// Mark connected without emitting.
    pub fn establish(&self) {
        lock(&self.state).state = ConnectionState::Connected;
    }

    /// Drop to disconnected without emitting, as a silent socket loss.
    pub fn drop_connection(&self) {
        lock(&self.state).state = ConnectionState::Disconnected;
    }

    pub fn login_count(&self) -> usize {
        lock(&self.state).logins
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.state).calls.clone()
    }

    pub fn password(&self) -> Option<String> {
        lock(&self.state)
            .settings
            .as_ref()
            .map(|s| s.password.expose_secret().to_string())
    }

    /// Queue the result of the next archive query.
    pub fn push_archive_page(&self, page: ArchivePage) {
        self.push_archive_batch(page, Vec::new());
    }

    /// Queue an archive page together with the events emitted before it
    /// returns.
    pub fn push_archive_batch(&self, page: ArchivePage, events: Vec<ProtocolEvent>) {
        lock(&self.state).pages.push_back(ScriptedPage { page, events });
    }

    pub fn archive_queries(&self) -> Vec<ArchiveQuery> {
        lock(&self.state).queries.clone()
    }

    fn record(&self, call: ClientCall) {
        lock(&self.state).calls.push(call);
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.state).state = state;
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    fn account(&self) -> &BareJid {
        &self.account
    }

    fn state(&self) -> ConnectionState {
        lock(&self.state).state
    }

    fn push_enabled(&self) -> bool {
        lock(&self.state)
            .settings
            .as_ref()
            .is_some_and(|s| s.push_enabled)
    }

    fn configure(&self, settings: ClientSettings) {
        let mut state = lock(&self.state);
        state.settings = Some(settings);
        state.calls.push(ClientCall::Configure);
    }

    async fn login(&self) -> Result<(), SkylarkError> {
        let behavior = {
            let mut state = lock(&self.state);
            state.calls.push(ClientCall::Login);
            state.logins += 1;
            state.state = ConnectionState::Connecting;
            state.behavior.clone()
        };

        let account = self.account.clone();
        match behavior {
            LoginBehavior::Stay => {}
            LoginBehavior::Establish => {
                self.set_state(ConnectionState::Connected);
                self.emit(ProtocolEvent::SessionEstablished { account }).await;
            }
            LoginBehavior::Resume => {
                self.set_state(ConnectionState::Connected);
                self.emit(ProtocolEvent::StreamResumed { account }).await;
            }
            LoginBehavior::Tls(chain) => {
                let accepted = self
                    .certificates
                    .as_ref()
                    .is_some_and(|check| check.accept(&account, &chain));
                if accepted {
                    self.set_state(ConnectionState::Connected);
                    self.emit(ProtocolEvent::SessionEstablished { account }).await;
                } else {
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(ProtocolEvent::CertificateError { account, chain }).await;
                }
            }
            LoginBehavior::AuthFail(reason) => {
                self.set_state(ConnectionState::Disconnected);
                self.emit(ProtocolEvent::AuthFailed { account, reason }).await;
            }
            LoginBehavior::Error => {
                self.set_state(ConnectionState::Disconnected);
                return Err(SkylarkError::connection("mock login failure"));
            }
            LoginBehavior::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn disconnect(&self, force: bool) {
        let emit = {
            let mut state = lock(&self.state);
            state.calls.push(ClientCall::Disconnect { force });
            let was_up = state.state != ConnectionState::Disconnected;
            state.state = ConnectionState::Disconnected;
            was_up && state.disconnect_emits
        };
        if emit {
            self.emit(ProtocolEvent::Disconnected {
                account: self.account.clone(),
            })
            .await;
        }
    }

    async fn keepalive(&self) {
        self.record(ClientCall::Keepalive);
    }

    async fn send_ack(&self) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(ClientCall::SendAck);
        state.ack_supported
    }

    async fn set_foreground(&self, foreground: bool) {
        self.record(ClientCall::SetForeground(foreground));
    }

    async fn query_archive(&self, query: ArchiveQuery) -> Result<ArchivePage, SkylarkError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.calls.push(ClientCall::QueryArchive);
            state.queries.push(query);
            state.pages.pop_front()
        };
        let Some(scripted) = scripted else {
            return Err(SkylarkError::connection("no archive page scripted"));
        };
        for event in &scripted.events {
            self.registry.dispatch(event).await;
        }
        Ok(scripted.page)
    }

    fn event_registry(&self) -> Arc<dyn EventRegistry> {
        self.registry.clone()
    }
}

/// Builds [`MockProtocolClient`]s and keeps them for inspection.
pub struct MockClientFactory {
    behavior: Mutex<LoginBehavior>,
    clients: Mutex<HashMap<BareJid, Arc<MockProtocolClient>>>,
    created: Mutex<usize>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::with_behavior(LoginBehavior::Establish)
    }

    /// Clients created from now on start with `behavior`.
    pub fn with_behavior(behavior: LoginBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            clients: Mutex::new(HashMap::new()),
            created: Mutex::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: LoginBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// The most recent client created for `account`.
    pub fn client(&self, account: &BareJid) -> Option<Arc<MockProtocolClient>> {
        lock(&self.clients).get(account).cloned()
    }

    /// Total clients created.
    pub fn created(&self) -> usize {
        *lock(&self.created)
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(
        &self,
        account: &BareJid,
        settings: ClientSettings,
        certificates: Arc<dyn CertificateCheck>,
    ) -> Result<Arc<dyn ProtocolClient>, SkylarkError> {
        let behavior = lock(&self.behavior).clone();
        let client = Arc::new(MockProtocolClient::with_settings(
            account.clone(),
            settings,
            certificates,
            behavior,
        ));
        lock(&self.clients).insert(account.clone(), Arc::clone(&client));
        *lock(&self.created) += 1;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skylark_core::{EventHandler, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &ProtocolEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn account() -> BareJid {
        BareJid::new("me@example.org").unwrap()
    }

    #[tokio::test]
    async fn login_establishes_and_emits() {
        let client = MockProtocolClient::new(account());
        let counter = Arc::new(Counter::default());
        client
            .event_registry()
            .register(counter.clone(), &[EventKind::SessionEstablished]);

        client.login().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.login_count(), 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_login_drops_back_to_disconnected() {
        let client = MockProtocolClient::new(account());
        client.set_login_behavior(LoginBehavior::Error);

        let err = client.login().await.unwrap_err();
        assert!(matches!(err, SkylarkError::Connection { .. }));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.login_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_emits_only_when_up() {
        let client = MockProtocolClient::new(account());
        let counter = Arc::new(Counter::default());
        client
            .event_registry()
            .register(counter.clone(), &[EventKind::Disconnected]);

        client.disconnect(true).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        client.establish();
        client.disconnect(false).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.calls(),
            vec![
                ClientCall::Disconnect { force: true },
                ClientCall::Disconnect { force: false }
            ]
        );
    }

    #[tokio::test]
    async fn archive_queries_are_scripted() {
        let client = MockProtocolClient::new(account());
        let query = ArchiveQuery {
            query_id: "q".into(),
            start: chrono::Utc::now(),
            page: skylark_core::types::PageRequest::Last { max: 10 },
        };
        assert!(client.query_archive(query.clone()).await.is_err());

        client.push_archive_page(ArchivePage {
            received: 2,
            ..ArchivePage::default()
        });
        assert_eq!(client.query_archive(query).await.unwrap().received, 2);
        assert_eq!(client.archive_queries().len(), 2);
    }
}

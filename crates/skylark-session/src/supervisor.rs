// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-account connection supervision.
//!
//! The [`ConnectionSupervisor`] keeps one protocol session per active,
//! credentialed account. It reacts to lifecycle events from the sessions
//! (disconnect, auth failure, certificate rejection, establishment,
//! resumption), to network availability and to the host application moving
//! between foreground and background.
//!
//! Lifecycle events are forwarded from each client's registry into a queue
//! drained by one supervisor task, so a client that emits events while
//! `login` is still running never waits on the account's slot. The task
//! hands each event to a lane of its account; a slow client only holds up
//! its own account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use skylark_bus::{EventBus, SupervisorEvent};
use skylark_core::traits::CertificateCheck;
use skylark_core::types::{
    ApplicationState, AuthFailure, ClientSettings, ConnectionState, LastError, PeerCertificate,
};
use skylark_core::{
    AccountDirectory, BareJid, ClientFactory, EventHandler, EventKind, ProtocolClient, ProtocolEvent,
    SkylarkError, SyncWatermark, TrustEvaluator,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::sync_archive;
use crate::certificate::{CertificateValidator, describe_chain};
use crate::config::SessionConfig;
use crate::fetch::{BackgroundFetchCoordinator, FetchResult, SessionFlush};
use crate::registry::{Session, SessionRegistry, SessionSlot, SessionSnapshot};
use crate::scheduler::ScheduledTask;

/// What [`ConnectionSupervisor::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A new session was created (and logged in when allowed).
    Created,
    /// An existing disconnected session was logged in.
    LoginStarted,
    /// A login attempt was scheduled after the backoff delay, or retried
    /// after a failed attempt.
    LoginScheduled(Duration),
    /// The session exists but login is not allowed right now.
    Idle,
    /// The session is connecting or connected; nothing to do.
    Unchanged,
    /// The account was deactivated while connected; teardown waits for the
    /// disconnect.
    TeardownDeferred,
    TornDown,
    /// No session and none wanted.
    Inactive,
}

/// Collaborators the supervisor works with.
pub struct Collaborators {
    pub directory: Arc<dyn AccountDirectory>,
    pub factory: Arc<dyn ClientFactory>,
    pub trust: Arc<dyn TrustEvaluator>,
    pub watermark: Arc<dyn SyncWatermark>,
}

/// A handler wired to every session for the given event kinds.
#[derive(Clone)]
pub struct Subscription {
    pub handler: Arc<dyn EventHandler>,
    pub kinds: Vec<EventKind>,
}

impl Subscription {
    pub fn new(handler: Arc<dyn EventHandler>, kinds: &[EventKind]) -> Self {
        Self {
            handler,
            kinds: kinds.to_vec(),
        }
    }
}

/// Queues lifecycle events for the supervisor task.
struct LifecycleForwarder {
    tx: mpsc::UnboundedSender<ProtocolEvent>,
}

#[async_trait]
impl EventHandler for LifecycleForwarder {
    async fn handle(&self, event: &ProtocolEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(kind = %event.kind(), "supervisor stopped, lifecycle event dropped");
        }
    }
}

struct Inner {
    me: Weak<Inner>,
    config: SessionConfig,
    directory: Arc<dyn AccountDirectory>,
    factory: Arc<dyn ClientFactory>,
    certificates: Arc<CertificateValidator>,
    watermark: Arc<dyn SyncWatermark>,
    registry: SessionRegistry,
    lifecycle: Arc<dyn EventHandler>,
    subscriptions: Vec<Subscription>,
    events: EventBus<SupervisorEvent>,
    fetch: BackgroundFetchCoordinator,
    network_available: AtomicBool,
    foreground: AtomicBool,
    shutdown: CancellationToken,
}

/// Supervises every account's protocol session.
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
    worker: JoinHandle<()>,
}

impl ConnectionSupervisor {
    /// Build the supervisor and start its event task.
    ///
    /// The network is initially considered unavailable; the host reports
    /// connectivity through [`set_network_available`](Self::set_network_available).
    pub fn start(
        config: SessionConfig,
        collaborators: Collaborators,
        subscriptions: Vec<Subscription>,
        events: EventBus<SupervisorEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let certificates = Arc::new(CertificateValidator::new(
            Arc::clone(&collaborators.directory),
            collaborators.trust,
        ));

        let inner = Arc::new_cyclic(|me: &Weak<Inner>| {
            let flush: Arc<dyn SessionFlush> = Arc::new(FlushConnected { inner: me.clone() });
            Inner {
                me: me.clone(),
                fetch: BackgroundFetchCoordinator::new(config.fetch, flush),
                config,
                directory: collaborators.directory,
                factory: collaborators.factory,
                certificates,
                watermark: collaborators.watermark,
                registry: SessionRegistry::new(),
                lifecycle: Arc::new(LifecycleForwarder { tx }),
                subscriptions,
                events,
                network_available: AtomicBool::new(false),
                foreground: AtomicBool::new(true),
                shutdown: CancellationToken::new(),
            }
        });

        let worker = tokio::spawn(run_events(Arc::downgrade(&inner), inner.shutdown.clone(), rx));
        info!("connection supervisor started");
        Self { inner, worker }
    }

    pub fn events(&self) -> &EventBus<SupervisorEvent> {
        &self.inner.events
    }

    pub fn certificate_validator(&self) -> Arc<CertificateValidator> {
        Arc::clone(&self.inner.certificates)
    }

    /// Create, log in, or tear down the account's session to match its
    /// configuration.
    pub async fn ensure(&self, account: &BareJid) -> Result<EnsureOutcome, SkylarkError> {
        self.inner.ensure(account).await
    }

    /// [`ensure`](Self::ensure) every configured account. Failures are logged.
    pub async fn ensure_all(&self) {
        self.inner.ensure_all(false).await;
    }

    /// Process one protocol event directly, bypassing the queue.
    pub async fn handle_event(&self, event: &ProtocolEvent) {
        self.inner.handle_event(event).await;
    }

    pub fn network_available(&self) -> bool {
        self.inner.network_available.load(Ordering::SeqCst)
    }

    /// Report a connectivity change.
    ///
    /// Coming up resets retry counters and ensures every account. Going down
    /// force-disconnects every session. Staying up sends keepalives.
    pub async fn set_network_available(&self, available: bool) {
        let was = self.inner.network_available.swap(available, Ordering::SeqCst);
        info!(available, was, "network availability changed");
        match (was, available) {
            (false, true) => self.inner.ensure_all(true).await,
            (true, true) => {
                for (_, slot) in self.inner.registry.slots() {
                    let guard = slot.lock().await;
                    if let Some(session) = guard.session.as_ref() {
                        session.client.keepalive().await;
                    }
                }
            }
            (true, false) => {
                for (_, slot) in self.inner.registry.slots() {
                    let mut guard = slot.lock().await;
                    if let Some(session) = guard.session.as_mut() {
                        session.reconnect = None;
                        session.client.disconnect(true).await;
                    }
                }
            }
            (false, false) => {}
        }
    }

    pub fn application_state(&self) -> ApplicationState {
        self.inner.application_state()
    }

    /// Report the host application moving to the foreground or background.
    pub async fn set_application_state(&self, state: ApplicationState) {
        let foreground = state == ApplicationState::Foreground;
        if self.inner.foreground.swap(foreground, Ordering::SeqCst) == foreground {
            return;
        }
        info!(%state, "application state changed");

        for (account, slot) in self.inner.registry.slots() {
            let mut guard = slot.lock().await;
            let Some(session) = guard.session.as_mut() else {
                continue;
            };
            if session.state() == ConnectionState::Connected {
                session.client.set_foreground(foreground).await;
            }
            if foreground {
                session.retry = 0;
                if session.state() == ConnectionState::Disconnected {
                    if let Err(e) = self.inner.ensure_locked(&account, &mut guard).await {
                        warn!(account = %account, error = %e, "login on foreground failed");
                    }
                }
            }
        }
    }

    /// The host is about to suspend us. Disconnects connected sessions that
    /// rely on push so the server starts pushing. Returns whether any
    /// session was asked to disconnect.
    pub async fn background_task_finished(&self) -> bool {
        if self.inner.application_state() == ApplicationState::Foreground {
            return false;
        }
        let mut stopping = 0;
        for (_, slot) in self.inner.registry.slots() {
            let guard = slot.lock().await;
            let Some(session) = guard.session.as_ref() else {
                continue;
            };
            if session.state() == ConnectionState::Connected && session.client.push_enabled() {
                session.client.disconnect(false).await;
                stopping += 1;
            }
        }
        debug!(stopping, "background task finished");
        stopping > 0
    }

    /// Run a background fetch for one account or for all of them.
    pub async fn perform_fetch(&self, account: Option<&BareJid>) -> FetchResult {
        if self.inner.application_state() == ApplicationState::Foreground {
            debug!("application active, skipping background fetch");
            return FetchResult::NewData;
        }
        if !self.network_available() {
            debug!("network unavailable, background fetch failed");
            return FetchResult::Failed;
        }

        let slots = match account {
            Some(account) => {
                let Some(slot) = self.inner.registry.existing(account) else {
                    return FetchResult::Failed;
                };
                if slot.lock().await.session.is_none() {
                    return FetchResult::Failed;
                }
                vec![(account.clone(), slot)]
            }
            None => self.inner.registry.slots(),
        };

        // Opened before probing, so a session established meanwhile is not
        // awaited for the whole long window.
        let ticket = self.inner.fetch.open().await;
        let mut awaiting = Vec::new();
        let mut keepalives = 0;
        for (jid, slot) in slots {
            let guard = slot.lock().await;
            let Some(session) = guard.session.as_ref() else {
                continue;
            };
            if session.state() == ConnectionState::Connected {
                session.client.keepalive().await;
                keepalives += 1;
            } else if !session.client.push_enabled() {
                awaiting.push(jid);
            }
        }
        self.inner.fetch.arm(&ticket, awaiting, keepalives).await;
        ticket.wait().await
    }

    /// Complete any pending background fetch now.
    pub async fn cancel_fetch(&self) -> bool {
        self.inner.fetch.cancel().await
    }

    pub async fn snapshot(&self, account: &BareJid) -> Option<SessionSnapshot> {
        self.inner.registry.snapshot(account).await
    }

    /// Accounts that currently own a session.
    pub async fn accounts(&self) -> Vec<BareJid> {
        self.inner.registry.accounts().await
    }

    /// Stop the event task, cancel pending timers and complete any fetch.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.fetch.cancel().await;
        for (_, slot) in self.inner.registry.slots() {
            let mut guard = slot.lock().await;
            if let Some(session) = guard.session.as_mut() {
                session.reconnect = None;
                session.sync = None;
            }
        }
        info!("connection supervisor stopped");
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.worker.abort();
    }
}

async fn run_events(
    inner: Weak<Inner>,
    shutdown: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
) {
    let mut lanes: HashMap<BareJid, mpsc::UnboundedSender<ProtocolEvent>> = HashMap::new();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let lane = lanes
            .entry(event.account().clone())
            .or_insert_with(|| spawn_lane(inner.clone(), shutdown.clone()));
        if lane.send(event).is_err() {
            break;
        }
    }
    debug!("supervisor event task finished");
}

/// Handle one account's events in order. The lane ends with the supervisor.
fn spawn_lane(inner: Weak<Inner>, shutdown: CancellationToken) -> mpsc::UnboundedSender<ProtocolEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProtocolEvent>();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            // A client stuck in login must not keep the slot past shutdown.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = inner.handle_event(&event) => {}
            }
        }
    });
    tx
}

/// Acknowledges pending stanzas on every connected session when a fetch
/// window closes.
struct FlushConnected {
    inner: Weak<Inner>,
}

#[async_trait]
impl SessionFlush for FlushConnected {
    async fn flush(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.application_state() == ApplicationState::Foreground {
            return;
        }
        for client in inner.clients().await {
            if client.state() == ConnectionState::Connected && !client.send_ack().await {
                client.keepalive().await;
            }
        }
    }
}

impl Inner {
    fn application_state(&self) -> ApplicationState {
        if self.foreground.load(Ordering::SeqCst) {
            ApplicationState::Foreground
        } else {
            ApplicationState::Background
        }
    }

    async fn clients(&self) -> Vec<Arc<dyn ProtocolClient>> {
        let mut clients = Vec::new();
        for (_, slot) in self.registry.slots() {
            if let Some(session) = slot.lock().await.session.as_ref() {
                clients.push(Arc::clone(&session.client));
            }
        }
        clients
    }

    fn publish_state(&self, account: &BareJid, session: Option<&Session>) {
        let (state, resumed) = match session {
            Some(session) => (session.state(), session.resumed),
            None => (ConnectionState::Disconnected, false),
        };
        self.events.publish(SupervisorEvent::AccountStateChanged {
            account: account.clone(),
            state,
            resumed,
        });
    }

    async fn ensure(&self, account: &BareJid) -> Result<EnsureOutcome, SkylarkError> {
        let slot = self.registry.slot(account);
        let mut guard = slot.lock().await;
        self.ensure_locked(account, &mut guard).await
    }

    async fn ensure_all(&self, reset_retries: bool) {
        for account in self.directory.accounts() {
            let slot = self.registry.slot(&account);
            let mut guard = slot.lock().await;
            if reset_retries {
                if let Some(session) = guard.session.as_mut() {
                    session.retry = 0;
                }
            }
            if let Err(e) = self.ensure_locked(&account, &mut guard).await {
                error!(account = %account, error = %e, "failed to ensure session");
            }
        }
    }

    async fn ensure_locked(
        &self,
        account: &BareJid,
        slot: &mut SessionSlot,
    ) -> Result<EnsureOutcome, SkylarkError> {
        let config = self.directory.config(account).filter(|c| c.active);
        let password = self.directory.password(account);
        let wanted = config.zip(password);

        let created = match (slot.session.as_mut(), wanted) {
            (None, None) => return Ok(EnsureOutcome::Inactive),
            (None, Some((config, password))) => {
                let settings = ClientSettings {
                    password,
                    resource: self.config.resource.clone(),
                    push_enabled: config.push_enabled,
                };
                let certificates: Arc<dyn CertificateCheck> = self.certificates.clone();
                let client = self.factory.create(account, settings, certificates)?;
                let registry = client.event_registry();
                registry.register(Arc::clone(&self.lifecycle), &EventKind::LIFECYCLE);
                for subscription in &self.subscriptions {
                    registry.register(Arc::clone(&subscription.handler), &subscription.kinds);
                }
                info!(account = %account, push = config.push_enabled, "session created");
                let session = Session::new(client, config.push_enabled);
                self.publish_state(account, Some(&session));
                slot.session = Some(session);
                true
            }
            (Some(session), wanted) => {
                if session.state() != ConnectionState::Disconnected {
                    if wanted.is_none() {
                        session.teardown_pending = true;
                        session.reconnect = None;
                        info!(account = %account, "account inactive, disconnecting before teardown");
                        session.client.disconnect(false).await;
                        return Ok(EnsureOutcome::TeardownDeferred);
                    }
                    return Ok(EnsureOutcome::Unchanged);
                }
                let Some((config, password)) = wanted else {
                    self.teardown(account, slot);
                    return Ok(EnsureOutcome::TornDown);
                };
                session.teardown_pending = false;
                session.push_enabled = config.push_enabled;
                session.client.configure(ClientSettings {
                    password,
                    resource: self.config.resource.clone(),
                    push_enabled: config.push_enabled,
                });
                false
            }
        };

        let Some(session) = slot.session.as_mut() else {
            return Ok(EnsureOutcome::Inactive);
        };
        if !self.login_allowed(session) {
            debug!(account = %account, "login deferred until network or foreground");
            return Ok(if created {
                EnsureOutcome::Created
            } else {
                EnsureOutcome::Idle
            });
        }

        let delay = self.config.backoff.delay(session.retry);
        if delay.is_zero() {
            session.reconnect = None;
            debug!(account = %account, retry = session.retry, "logging in");
            if let Err(e) = session.client.login().await {
                if e.is_account_fatal() {
                    return Err(e);
                }
                let delay = self.retry_login(account, session, &e);
                return Ok(EnsureOutcome::LoginScheduled(delay));
            }
            return Ok(if created {
                EnsureOutcome::Created
            } else {
                EnsureOutcome::LoginStarted
            });
        }

        info!(account = %account, retry = session.retry, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        session.reconnect = Some(self.schedule_login(account, delay));
        Ok(EnsureOutcome::LoginScheduled(delay))
    }

    fn login_allowed(&self, session: &Session) -> bool {
        self.network_available.load(Ordering::SeqCst)
            && (self.application_state() == ApplicationState::Foreground || !session.push_enabled)
    }

    fn schedule_login(&self, account: &BareJid, delay: Duration) -> ScheduledTask {
        let me = self.me.clone();
        let target = account.clone();
        ScheduledTask::after(delay, async move {
            if let Some(inner) = me.upgrade() {
                inner.scheduled_login(&target).await;
            }
        })
    }

    /// Count a failed login call as a failed attempt and schedule the next
    /// one after the backoff delay.
    fn retry_login(&self, account: &BareJid, session: &mut Session, error: &SkylarkError) -> Duration {
        session.retry = session.retry.saturating_add(1);
        let delay = self.config.backoff.delay(session.retry);
        warn!(
            account = %account,
            retry = session.retry,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "login failed, retrying"
        );
        self.publish_state(account, Some(&*session));
        session.reconnect = Some(self.schedule_login(account, delay));
        delay
    }

    async fn scheduled_login(&self, account: &BareJid) {
        let slot = self.registry.slot(account);
        let mut guard = slot.lock().await;
        let Some(session) = guard.session.as_mut() else {
            return;
        };
        session.reconnect = None;
        if session.state() != ConnectionState::Disconnected || session.teardown_pending {
            return;
        }
        if !self.login_allowed(session) {
            debug!(account = %account, "scheduled login skipped, login not allowed");
            return;
        }
        debug!(account = %account, retry = session.retry, "scheduled login");
        if let Err(e) = session.client.login().await {
            if e.is_account_fatal() {
                warn!(account = %account, error = %e, "scheduled login rejected");
                return;
            }
            self.retry_login(account, session, &e);
        }
    }

    fn teardown(&self, account: &BareJid, slot: &mut SessionSlot) {
        let Some(session) = slot.session.take() else {
            return;
        };
        let registry = session.client.event_registry();
        registry.unregister(&self.lifecycle, &EventKind::LIFECYCLE);
        for subscription in &self.subscriptions {
            registry.unregister(&subscription.handler, &subscription.kinds);
        }
        info!(account = %account, "session torn down");
        self.publish_state(account, None);
    }

    async fn handle_event(&self, event: &ProtocolEvent) {
        let account = event.account();
        let result = match event {
            ProtocolEvent::Disconnected { .. } => self.on_disconnected(account).await,
            ProtocolEvent::AuthFailed { reason, .. } => self.on_auth_failed(account, reason).await,
            ProtocolEvent::CertificateError { chain, .. } => {
                self.on_certificate_error(account, chain).await
            }
            ProtocolEvent::SessionEstablished { .. } => self.on_established(account).await,
            ProtocolEvent::StreamResumed { .. } => self.on_resumed(account).await,
            ProtocolEvent::MessageReceived { .. }
            | ProtocolEvent::CarbonReceived { .. }
            | ProtocolEvent::GroupMessageReceived { .. }
            | ProtocolEvent::ArchiveMessageReceived { .. }
            | ProtocolEvent::DeliveryReceiptReceived { .. } => Ok(()),
        };
        if let Err(e) = result {
            error!(account = %account, kind = %event.kind(), error = %e, "failed to handle lifecycle event");
        }
    }

    async fn on_disconnected(&self, account: &BareJid) -> Result<(), SkylarkError> {
        self.fetch.session_disconnected().await;
        let Some(slot) = self.registry.existing(account) else {
            return Ok(());
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.session.as_mut() else {
            return Ok(());
        };
        session.retry = session.retry.saturating_add(1);
        session.resumed = false;
        session.sync = None;
        info!(account = %account, retry = session.retry, "session disconnected");
        self.publish_state(account, Some(&*session));
        self.ensure_locked(account, &mut guard).await.map(|_| ())
    }

    async fn on_auth_failed(&self, account: &BareJid, reason: &AuthFailure) -> Result<(), SkylarkError> {
        if reason.is_voluntary_abort() {
            debug!(account = %account, "authentication aborted, retrying");
            return self.ensure(account).await.map(|_| ());
        }
        warn!(account = %account, %reason, "authentication failed, deactivating account");
        self.stop_reconnecting(account).await;
        self.directory.deactivate(account)?;
        self.directory.record_last_error(account, LastError::Auth);
        self.events.publish(SupervisorEvent::AuthenticationFailed {
            account: account.clone(),
            reason: reason.clone(),
        });
        Ok(())
    }

    async fn on_certificate_error(
        &self,
        account: &BareJid,
        chain: &[PeerCertificate],
    ) -> Result<(), SkylarkError> {
        warn!(account = %account, chain = chain.len(), "server certificate rejected, deactivating account");
        self.stop_reconnecting(account).await;
        self.directory.deactivate(account)?;
        let certificate = describe_chain(chain);
        if let Some(certificate) = &certificate {
            self.directory.store_certificate(account, certificate.clone())?;
        }
        self.directory.record_last_error(account, LastError::Certificate);
        self.events.publish(SupervisorEvent::CertificateRejected {
            account: account.clone(),
            certificate,
        });
        Ok(())
    }

    async fn stop_reconnecting(&self, account: &BareJid) {
        if let Some(slot) = self.registry.existing(account) {
            if let Some(session) = slot.lock().await.session.as_mut() {
                session.reconnect = None;
            }
        }
    }

    async fn on_established(&self, account: &BareJid) -> Result<(), SkylarkError> {
        let Some(slot) = self.registry.existing(account) else {
            return Ok(());
        };
        {
            let mut guard = slot.lock().await;
            let Some(session) = guard.session.as_mut() else {
                return Ok(());
            };
            session.retry = 0;
            session.resumed = false;
            session.reconnect = None;
            info!(account = %account, "session established");
            self.publish_state(account, Some(&*session));
            if self.application_state() == ApplicationState::Background {
                session.client.set_foreground(false).await;
            }
        }
        self.fetch.session_connected(account).await;
        self.start_sync(account).await
    }

    async fn on_resumed(&self, account: &BareJid) -> Result<(), SkylarkError> {
        let Some(slot) = self.registry.existing(account) else {
            return Ok(());
        };
        {
            let mut guard = slot.lock().await;
            let Some(session) = guard.session.as_mut() else {
                return Ok(());
            };
            session.retry = 0;
            session.resumed = true;
            session.reconnect = None;
            session.last_resumed_at = Some(Utc::now());
            let foreground = self.application_state() == ApplicationState::Foreground;
            session.client.set_foreground(foreground).await;
            info!(account = %account, "stream resumed");
            self.publish_state(account, Some(&*session));
        }
        self.fetch.session_connected(account).await;
        Ok(())
    }

    /// Replay the archive from the last stored message, or from the sync
    /// period ago when nothing is stored yet.
    async fn start_sync(&self, account: &BareJid) -> Result<(), SkylarkError> {
        let policy = self.config.sync;
        if !policy.automatic || policy.period.is_zero() {
            return Ok(());
        }
        let now = Utc::now();
        let start = match self.watermark.last_synced(account).await? {
            Some(last) => last,
            None => {
                let period = chrono::Duration::from_std(policy.period)
                    .map_err(|e| SkylarkError::Internal(format!("sync period out of range: {e}")))?;
                now - period
            }
        };
        if start >= now {
            return Ok(());
        }

        let Some(slot) = self.registry.existing(account) else {
            return Ok(());
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.session.as_mut() else {
            return Ok(());
        };
        let client = Arc::clone(&session.client);
        let target = account.clone();
        debug!(account = %account, %start, "starting archive sync");
        session.sync = Some(ScheduledTask::with_token(Duration::ZERO, move |token| async move {
            if let Err(e) = sync_archive(client, start, policy.page_size, token).await {
                warn!(account = %target, error = %e, "archive sync failed");
            }
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_core::types::{AccountConfig, ArchivePage, PageRequest};
    use skylark_test_utils::{
        ClientCall, InMemoryAccountDirectory, LoginBehavior, MockClientFactory, MockWatermark, StaticTrust,
    };
    use tokio::sync::broadcast;

    struct Fixture {
        supervisor: ConnectionSupervisor,
        directory: Arc<InMemoryAccountDirectory>,
        factory: Arc<MockClientFactory>,
        watermark: Arc<MockWatermark>,
        events: broadcast::Receiver<skylark_bus::Envelope<SupervisorEvent>>,
    }

    fn me() -> BareJid {
        BareJid::new("me@example.org").unwrap()
    }

    fn fixture_with(config: SessionConfig, push: bool) -> Fixture {
        let directory = Arc::new(InMemoryAccountDirectory::new());
        let mut account = AccountConfig::new(me());
        account.push_enabled = push;
        directory.insert(account, "secret");
        let factory = Arc::new(MockClientFactory::new());
        let watermark = Arc::new(MockWatermark::default());
        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let supervisor = ConnectionSupervisor::start(
            config,
            Collaborators {
                directory: directory.clone(),
                factory: factory.clone(),
                trust: Arc::new(StaticTrust::new(false)),
                watermark: watermark.clone(),
            },
            Vec::new(),
            bus,
        );
        Fixture {
            supervisor,
            directory,
            factory,
            watermark,
            events,
        }
    }

    fn fixture() -> Fixture {
        let mut config = SessionConfig::default();
        config.sync.automatic = false;
        fixture_with(config, false)
    }

    fn drain(rx: &mut broadcast::Receiver<skylark_bus::Envelope<SupervisorEvent>>) -> Vec<SupervisorEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope.payload);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_creates_and_logs_in_when_online() {
        let f = fixture();
        assert_eq!(f.supervisor.ensure(&me()).await.unwrap(), EnsureOutcome::Created);
        let client = f.factory.client(&me()).unwrap();
        // Offline: created but not logged in.
        assert_eq!(client.login_count(), 0);

        f.supervisor.set_network_available(true).await;
        assert_eq!(client.login_count(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(f.factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_without_credentials_is_inactive() {
        let f = fixture();
        let stranger = BareJid::new("nobody@example.org").unwrap();
        assert_eq!(f.supervisor.ensure(&stranger).await.unwrap(), EnsureOutcome::Inactive);
        assert!(f.supervisor.accounts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn push_account_in_background_stays_idle() {
        let mut config = SessionConfig::default();
        config.sync.automatic = false;
        let f = fixture_with(config, true);
        f.supervisor.set_application_state(ApplicationState::Background).await;
        f.supervisor.set_network_available(true).await;

        let client = f.factory.client(&me()).unwrap();
        assert_eq!(client.login_count(), 0);
        assert_eq!(f.supervisor.ensure(&me()).await.unwrap(), EnsureOutcome::Idle);

        f.supervisor.set_application_state(ApplicationState::Foreground).await;
        assert_eq!(client.login_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnects_back_off_linearly() {
        let f = fixture();
        f.supervisor.ensure(&me()).await.unwrap();
        let client = f.factory.client(&me()).unwrap();
        client.set_login_behavior(LoginBehavior::Stay);
        f.supervisor.set_network_available(true).await;
        assert_eq!(client.login_count(), 1);

        // Failures 1 and 2 reconnect immediately, 3 waits 5 s, 4 waits 10 s.
        for expected_logins in [2, 3] {
            client.drop_connection();
            f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
            assert_eq!(client.login_count(), expected_logins);
        }
        client.drop_connection();
        f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        let snapshot = f.supervisor.snapshot(&me()).await.unwrap();
        assert_eq!(snapshot.retry, 3);
        assert!(snapshot.reconnect_pending);
        assert_eq!(client.login_count(), 3);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(client.login_count(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.login_count(), 4);

        client.drop_connection();
        f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(client.login_count(), 4);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.login_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn scheduled_reconnect_is_logged() {
        let f = fixture();
        f.supervisor.ensure(&me()).await.unwrap();
        let client = f.factory.client(&me()).unwrap();
        client.set_login_behavior(LoginBehavior::Stay);
        f.supervisor.set_network_available(true).await;
        for _ in 0..3 {
            client.drop_connection();
            f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        }
        assert!(logs_contain("scheduling reconnect"));
        assert!(logs_contain("delay_ms=5000"));
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn failed_login_call_counts_as_attempt_and_backs_off() {
        let f = fixture();
        f.supervisor.ensure(&me()).await.unwrap();
        let client = f.factory.client(&me()).unwrap();
        client.set_login_behavior(LoginBehavior::Error);
        f.supervisor.set_network_available(true).await;

        // The first call and two immediate retries fail, then the delay applies.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.login_count(), 3);
        let snapshot = f.supervisor.snapshot(&me()).await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.retry, 3);
        assert!(snapshot.reconnect_pending);
        assert!(logs_contain("login failed, retrying"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.login_count(), 4);
        assert_eq!(f.supervisor.snapshot(&me()).await.unwrap().retry, 4);
        assert_eq!(
            f.supervisor.ensure(&me()).await.unwrap(),
            EnsureOutcome::LoginScheduled(Duration::from_secs(10))
        );

        // Going offline drops the pending retry.
        f.supervisor.set_network_available(false).await;
        assert!(!f.supervisor.snapshot(&me()).await.unwrap().reconnect_pending);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.login_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn established_resets_retry_and_cancels_pending_reconnect() {
        let f = fixture();
        f.supervisor.ensure(&me()).await.unwrap();
        let client = f.factory.client(&me()).unwrap();
        client.set_login_behavior(LoginBehavior::Stay);
        f.supervisor.set_network_available(true).await;
        for _ in 0..3 {
            client.drop_connection();
            f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        }
        assert!(f.supervisor.snapshot(&me()).await.unwrap().reconnect_pending);

        client.establish();
        f.supervisor.handle_event(&ProtocolEvent::SessionEstablished { account: me() }).await;
        let snapshot = f.supervisor.snapshot(&me()).await.unwrap();
        assert_eq!(snapshot.retry, 0);
        assert!(!snapshot.reconnect_pending);
        assert!(!snapshot.resumed);

        let logins = client.login_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.login_count(), logins);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_marks_session_and_reapplies_mode() {
        let f = fixture();
        f.supervisor.set_network_available(true).await;
        let client = f.factory.client(&me()).unwrap();
        f.supervisor.set_application_state(ApplicationState::Background).await;

        f.supervisor.handle_event(&ProtocolEvent::StreamResumed { account: me() }).await;
        let snapshot = f.supervisor.snapshot(&me()).await.unwrap();
        assert!(snapshot.resumed);
        assert!(snapshot.last_resumed_at.is_some());
        assert_eq!(client.calls().last(), Some(&ClientCall::SetForeground(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_deactivates_and_signals() {
        let mut f = fixture();
        f.supervisor.set_network_available(true).await;
        drain(&mut f.events);

        f.supervisor
            .handle_event(&ProtocolEvent::AuthFailed {
                account: me(),
                reason: AuthFailure::NotAuthorized,
            })
            .await;
        assert!(!f.directory.config(&me()).unwrap().active);
        assert_eq!(f.directory.last_error(&me()), Some(LastError::Auth));
        assert!(drain(&mut f.events).contains(&SupervisorEvent::AuthenticationFailed {
            account: me(),
            reason: AuthFailure::NotAuthorized,
        }));

        // The connection then drops; the inactive account is torn down.
        let client = f.factory.client(&me()).unwrap();
        client.drop_connection();
        f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        assert!(f.supervisor.accounts().await.is_empty());
        assert!(client.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_auth_retries() {
        let f = fixture();
        f.supervisor.set_network_available(true).await;
        let client = f.factory.client(&me()).unwrap();
        client.drop_connection();
        f.supervisor
            .handle_event(&ProtocolEvent::AuthFailed {
                account: me(),
                reason: AuthFailure::Aborted,
            })
            .await;
        assert!(f.directory.config(&me()).unwrap().active);
        assert_eq!(client.login_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn certificate_error_persists_identity() {
        let mut f = fixture();
        f.supervisor.set_network_available(true).await;
        drain(&mut f.events);
        let chain = vec![
            PeerCertificate {
                der: b"leaf".to_vec(),
                subject: "example.org".into(),
            },
            PeerCertificate {
                der: b"issuer".to_vec(),
                subject: "Example CA".into(),
            },
        ];
        f.supervisor
            .handle_event(&ProtocolEvent::CertificateError {
                account: me(),
                chain: chain.clone(),
            })
            .await;

        let config = f.directory.config(&me()).unwrap();
        assert!(!config.active);
        let stored = config.server_certificate.unwrap();
        assert_eq!(stored.cert_name, "example.org");
        assert_eq!(stored.issuer_name.as_deref(), Some("Example CA"));
        assert!(!stored.accepted);
        assert_eq!(f.directory.last_error(&me()), Some(LastError::Certificate));
        assert!(drain(&mut f.events).iter().any(|e| matches!(
            e,
            SupervisorEvent::CertificateRejected { certificate: Some(_), .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_waits_for_disconnect() {
        let f = fixture();
        f.supervisor.set_network_available(true).await;
        let client = f.factory.client(&me()).unwrap();
        client.set_disconnect_emits(false);
        f.directory.deactivate(&me()).unwrap();

        assert_eq!(f.supervisor.ensure(&me()).await.unwrap(), EnsureOutcome::TeardownDeferred);
        assert_eq!(f.supervisor.accounts().await, vec![me()]);
        assert!(client.calls().contains(&ClientCall::Disconnect { force: false }));

        f.supervisor.handle_event(&ProtocolEvent::Disconnected { account: me() }).await;
        assert!(f.supervisor.accounts().await.is_empty());
        assert_eq!(f.supervisor.ensure(&me()).await.unwrap(), EnsureOutcome::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_force_disconnects_and_return_reconnects() {
        let f = fixture();
        f.supervisor.set_network_available(true).await;
        let client = f.factory.client(&me()).unwrap();

        f.supervisor.set_network_available(true).await;
        assert!(client.calls().contains(&ClientCall::Keepalive));

        f.supervisor.set_network_available(false).await;
        assert!(client.calls().contains(&ClientCall::Disconnect { force: true }));
        // Let the queued disconnect event run through the supervisor task.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let logins = client.login_count();

        f.supervisor.set_network_available(true).await;
        assert_eq!(client.login_count(), logins + 1);
        assert_eq!(f.supervisor.snapshot(&me()).await.unwrap().retry, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn establishment_starts_archive_sync_from_watermark() {
        let f = fixture_with(SessionConfig::default(), false);
        let last = Utc::now() - chrono::Duration::hours(1);
        f.watermark.set(&me(), last);
        f.supervisor.ensure(&me()).await.unwrap();
        let client = f.factory.client(&me()).unwrap();
        client.push_archive_page(ArchivePage {
            received: 3,
            first: Some("a".into()),
            index: Some(0),
        });

        f.supervisor.set_network_available(true).await;
        // Login emitted SessionEstablished; the queued event starts the sync.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let queries = client.archive_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].start, last);
        assert_eq!(queries[0].page, PageRequest::Last { max: 100 });
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_finished_disconnects_push_sessions() {
        let mut config = SessionConfig::default();
        config.sync.automatic = false;
        let f = fixture_with(config, true);
        f.supervisor.set_network_available(true).await;
        assert!(!f.supervisor.background_task_finished().await);

        f.supervisor.set_application_state(ApplicationState::Background).await;
        assert!(f.supervisor.background_task_finished().await);
        let client = f.factory.client(&me()).unwrap();
        assert!(client.calls().contains(&ClientCall::Disconnect { force: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn perform_fetch_gates_on_state() {
        let f = fixture();
        assert_eq!(f.supervisor.perform_fetch(None).await, FetchResult::NewData);

        f.supervisor.set_application_state(ApplicationState::Background).await;
        assert_eq!(f.supervisor.perform_fetch(None).await, FetchResult::Failed);

        f.supervisor.set_network_available(true).await;
        let stranger = BareJid::new("nobody@example.org").unwrap();
        assert_eq!(f.supervisor.perform_fetch(Some(&stranger)).await, FetchResult::Failed);

        // Connected session: keepalive, short window, then an ack.
        let started = tokio::time::Instant::now();
        assert_eq!(f.supervisor.perform_fetch(Some(&me())).await, FetchResult::NewData);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        let client = f.factory.client(&me()).unwrap();
        let calls = client.calls();
        assert!(calls.contains(&ClientCall::Keepalive));
        assert_eq!(calls.last(), Some(&ClientCall::SendAck));
    }
}

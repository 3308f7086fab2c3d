// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded background fetch windows.
//!
//! When the host grants a short execution window after a wake event, the
//! coordinator keeps it open just long enough for connected sessions to
//! flush buffered data and for disconnected ones to reconnect, then reports
//! completion exactly once.
//!
//! A single timer governs each fetch. It runs for the long deadline when some
//! session has to reconnect and for the short one otherwise. Once the last
//! awaited session connects with enough of the long window left, the timer
//! is cut down to a grace period. A disconnect while a shorter timer runs
//! stretches it to the remainder of the long window.
//!
//! A fetch is opened before the caller inspects its sessions and armed once
//! it knows which ones to wait for. Sessions that connect in between are
//! remembered and never awaited.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use skylark_config::model::FetchConfig;
use skylark_core::BareJid;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::scheduler::ScheduledTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDeadlines {
    pub short: Duration,
    pub long: Duration,
    pub safety_margin: Duration,
    pub grace: Duration,
}

impl Default for FetchDeadlines {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchDeadlines {
    fn from(config: &FetchConfig) -> Self {
        Self {
            short: Duration::from_secs(config.short_secs),
            long: Duration::from_secs(config.long_secs),
            safety_margin: Duration::from_secs(config.safety_margin_secs),
            grace: Duration::from_secs(config.grace_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    NewData,
    Failed,
}

/// Final acknowledgement sent to connected sessions when a window closes.
#[async_trait]
pub trait SessionFlush: Send + Sync {
    async fn flush(&self);
}

struct PendingFetch {
    id: u64,
    timer_id: u64,
    started: Instant,
    window: Duration,
    awaiting: HashSet<BareJid>,
    /// Sessions that connected before the fetch was armed.
    connected: HashSet<BareJid>,
    /// `None` until armed.
    timer: Option<ScheduledTask>,
    done: oneshot::Sender<FetchResult>,
}

impl PendingFetch {
    fn finish(self, result: FetchResult) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        // The caller may have stopped waiting; nothing else to notify.
        let _ = self.done.send(result);
    }
}

#[derive(Default)]
struct FetchState {
    next_fetch: u64,
    next_timer: u64,
    pending: Option<PendingFetch>,
}

struct Shared {
    deadlines: FetchDeadlines,
    flush: Arc<dyn SessionFlush>,
    state: Mutex<FetchState>,
}

impl Shared {
    async fn expire(&self, timer_id: u64) {
        let pending = {
            let mut state = self.state.lock().await;
            let current = state.pending.as_ref().is_some_and(|p| p.timer_id == timer_id);
            if current { state.pending.take() } else { None }
        };
        let Some(pending) = pending else {
            return;
        };
        debug!(elapsed_ms = pending.started.elapsed().as_millis() as u64, "fetch window closed");
        self.flush.flush().await;
        pending.finish(FetchResult::NewData);
    }
}

fn arm_timer(shared: Weak<Shared>, next_timer: &mut u64, delay: Duration) -> (u64, ScheduledTask) {
    *next_timer += 1;
    let timer_id = *next_timer;
    let task = ScheduledTask::after(delay, async move {
        if let Some(shared) = shared.upgrade() {
            shared.expire(timer_id).await;
        }
    });
    (timer_id, task)
}

/// An opened fetch, armed with [`BackgroundFetchCoordinator::arm`].
pub struct FetchTicket {
    id: u64,
    done: oneshot::Receiver<FetchResult>,
}

impl FetchTicket {
    /// Wait for the fetch to complete.
    pub async fn wait(self) -> FetchResult {
        self.done.await.unwrap_or(FetchResult::NewData)
    }
}

pub struct BackgroundFetchCoordinator {
    shared: Arc<Shared>,
}

impl BackgroundFetchCoordinator {
    pub fn new(deadlines: FetchDeadlines, flush: Arc<dyn SessionFlush>) -> Self {
        Self {
            shared: Arc::new(Shared {
                deadlines,
                flush,
                state: Mutex::new(FetchState::default()),
            }),
        }
    }

    pub fn deadlines(&self) -> FetchDeadlines {
        self.shared.deadlines
    }

    /// Open a fetch and complete any pending one.
    ///
    /// The fetch runs no timer until [`arm`](Self::arm) is called with the
    /// same ticket.
    pub async fn open(&self) -> FetchTicket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.shared.state.lock().await;

        if let Some(previous) = state.pending.take() {
            debug!("new fetch supersedes pending one");
            previous.finish(FetchResult::NewData);
        }

        state.next_fetch += 1;
        let id = state.next_fetch;
        state.pending = Some(PendingFetch {
            id,
            timer_id: 0,
            started: Instant::now(),
            window: Duration::ZERO,
            awaiting: HashSet::new(),
            connected: HashSet::new(),
            timer: None,
            done: tx,
        });
        FetchTicket { id, done: rx }
    }

    /// Start the timer of an opened fetch.
    ///
    /// `awaiting` are sessions that must reconnect; `keepalives` is the
    /// number of connected sessions already poked. Does nothing when the
    /// ticket was superseded or cancelled.
    pub async fn arm(&self, ticket: &FetchTicket, awaiting: Vec<BareJid>, keepalives: usize) {
        let mut guard = self.shared.state.lock().await;
        let FetchState {
            next_timer,
            pending,
            ..
        } = &mut *guard;
        let Some(fetch) = pending
            .as_mut()
            .filter(|p| p.id == ticket.id && p.timer.is_none())
        else {
            return;
        };

        let offered = awaiting.len();
        fetch.awaiting = awaiting
            .into_iter()
            .filter(|account| !fetch.connected.contains(account))
            .collect();
        let reconnected = offered - fetch.awaiting.len();
        if fetch.awaiting.is_empty() && keepalives == 0 && reconnected == 0 {
            if let Some(fetch) = pending.take() {
                fetch.finish(FetchResult::NewData);
            }
            return;
        }

        let deadlines = self.shared.deadlines;
        let window = if !fetch.awaiting.is_empty() {
            deadlines.long
        } else if reconnected > 0 {
            deadlines.grace
        } else {
            deadlines.short
        };
        info!(
            awaiting = fetch.awaiting.len(),
            reconnected,
            keepalives,
            window_ms = window.as_millis() as u64,
            "background fetch started"
        );
        let (timer_id, timer) = arm_timer(Arc::downgrade(&self.shared), next_timer, window);
        fetch.timer_id = timer_id;
        fetch.window = window;
        fetch.timer = Some(timer);
    }

    /// [`open`](Self::open) and [`arm`](Self::arm) in one step. The receiver
    /// resolves exactly once.
    pub async fn begin(&self, awaiting: Vec<BareJid>, keepalives: usize) -> oneshot::Receiver<FetchResult> {
        let ticket = self.open().await;
        self.arm(&ticket, awaiting, keepalives).await;
        ticket.done
    }

    /// [`begin`](Self::begin) and wait for completion.
    pub async fn perform(&self, awaiting: Vec<BareJid>, keepalives: usize) -> FetchResult {
        let ticket = self.open().await;
        self.arm(&ticket, awaiting, keepalives).await;
        ticket.wait().await
    }

    /// An awaited session connected or resumed.
    pub async fn session_connected(&self, account: &BareJid) {
        let mut guard = self.shared.state.lock().await;
        let FetchState {
            next_timer,
            pending,
            ..
        } = &mut *guard;
        let Some(pending) = pending.as_mut() else {
            return;
        };
        if pending.timer.is_none() {
            pending.connected.insert(account.clone());
            return;
        }
        if !pending.awaiting.remove(account) || !pending.awaiting.is_empty() {
            return;
        }

        let deadlines = self.shared.deadlines;
        let left = deadlines
            .long
            .saturating_sub(deadlines.safety_margin)
            .saturating_sub(pending.started.elapsed());
        if left.is_zero() {
            return;
        }
        debug!(account = %account, grace_ms = deadlines.grace.as_millis() as u64, "all sessions reconnected, shortening fetch window");
        let (timer_id, timer) = arm_timer(Arc::downgrade(&self.shared), next_timer, deadlines.grace);
        pending.timer_id = timer_id;
        pending.window = deadlines.grace;
        pending.timer = Some(timer);
    }

    /// A session dropped while a window is open.
    pub async fn session_disconnected(&self) {
        let mut guard = self.shared.state.lock().await;
        let FetchState {
            next_timer,
            pending,
            ..
        } = &mut *guard;
        let Some(pending) = pending.as_mut() else {
            return;
        };
        let long = self.shared.deadlines.long;
        if pending.timer.is_none() || pending.window >= long {
            return;
        }
        let remaining = long.saturating_sub(pending.started.elapsed());
        debug!(remaining_ms = remaining.as_millis() as u64, "session dropped, extending fetch window");
        let (timer_id, timer) = arm_timer(Arc::downgrade(&self.shared), next_timer, remaining);
        pending.timer_id = timer_id;
        pending.window = long;
        pending.timer = Some(timer);
    }

    /// Complete any pending fetch now. Returns whether one was pending.
    pub async fn cancel(&self) -> bool {
        let pending = self.shared.state.lock().await.pending.take();
        match pending {
            Some(pending) => {
                pending.finish(FetchResult::NewData);
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self) -> bool {
        self.shared.state.lock().await.pending.is_some()
    }
}

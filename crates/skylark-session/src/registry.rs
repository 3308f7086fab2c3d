// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyed registry of per-account sessions.
//!
//! Every account owns one slot guarded by its own async mutex. A slot holds
//! at most one [`Session`]; all handling for an account happens with the
//! slot locked, which serializes login and disconnect sequences per account
//! while different accounts proceed independently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use skylark_core::types::ConnectionState;
use skylark_core::{BareJid, ProtocolClient};
use tokio::sync::Mutex;

use crate::scheduler::ScheduledTask;

/// Live state of one account's protocol session.
pub struct Session {
    pub client: Arc<dyn ProtocolClient>,
    /// Consecutive failed connection attempts.
    pub retry: u32,
    pub resumed: bool,
    pub push_enabled: bool,
    pub last_resumed_at: Option<DateTime<Utc>>,
    /// Teardown was requested while still connected.
    pub teardown_pending: bool,
    pub reconnect: Option<ScheduledTask>,
    pub sync: Option<ScheduledTask>,
}

impl Session {
    pub fn new(client: Arc<dyn ProtocolClient>, push_enabled: bool) -> Self {
        Self {
            client,
            retry: 0,
            resumed: false,
            push_enabled,
            last_resumed_at: None,
            teardown_pending: false,
            reconnect: None,
            sync: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            account: self.client.account().clone(),
            state: self.client.state(),
            resumed: self.resumed,
            retry: self.retry,
            push_enabled: self.push_enabled,
            last_resumed_at: self.last_resumed_at,
            reconnect_pending: self.reconnect.as_ref().is_some_and(|t| !t.is_finished()),
            sync_pending: self.sync.as_ref().is_some_and(|t| !t.is_finished()),
        }
    }
}

/// Point-in-time view of a session for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub account: BareJid,
    pub state: ConnectionState,
    pub resumed: bool,
    pub retry: u32,
    pub push_enabled: bool,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub reconnect_pending: bool,
    pub sync_pending: bool,
}

#[derive(Default)]
pub struct SessionSlot {
    pub session: Option<Session>,
}

pub type SlotHandle = Arc<Mutex<SessionSlot>>;

/// Account → slot map. Slots are created on first use and never removed,
/// so two callers can never end up holding different slots for one account.
#[derive(Default)]
pub struct SessionRegistry {
    slots: DashMap<BareJid, SlotHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The account's slot, created empty if missing.
    pub fn slot(&self, account: &BareJid) -> SlotHandle {
        Arc::clone(self.slots.entry(account.clone()).or_default().value())
    }

    /// The account's slot if one was ever created.
    pub fn existing(&self, account: &BareJid) -> Option<SlotHandle> {
        self.slots.get(account).map(|slot| Arc::clone(slot.value()))
    }

    /// Every slot, snapshotted so no map guard is held across awaits.
    pub fn slots(&self) -> Vec<(BareJid, SlotHandle)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Accounts that currently own a session.
    pub async fn accounts(&self) -> Vec<BareJid> {
        let mut accounts = Vec::new();
        for (account, slot) in self.slots() {
            if slot.lock().await.session.is_some() {
                accounts.push(account);
            }
        }
        accounts.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        accounts
    }

    pub async fn snapshot(&self, account: &BareJid) -> Option<SessionSnapshot> {
        let slot = self.existing(account)?;
        let guard = slot.lock().await;
        guard.session.as_ref().map(Session::snapshot)
    }
}

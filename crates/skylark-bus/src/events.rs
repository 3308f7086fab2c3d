// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification payloads published by the history store and the session
//! supervisor.

use chrono::{DateTime, Utc};
use skylark_core::types::{
    AuthFailure, CarbonAction, ConnectionState, Direction, Encryption, MessageState,
    ServerCertificate,
};
use skylark_core::{BareJid, EntryId};

/// What changed on an existing history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    State(MessageState),
    Preview(Option<String>),
}

/// Conversation-wide change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    MarkedRead,
    Removed,
}

/// History store notifications, published after the mutation committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    MessageNew {
        entry_id: EntryId,
        account: BareJid,
        peer: BareJid,
        author_nickname: Option<String>,
        timestamp: DateTime<Utc>,
        body: String,
        state: MessageState,
        encryption: Encryption,
        from_archive: bool,
        carbon: Option<CarbonAction>,
    },
    MessageUpdated {
        entry_id: EntryId,
        account: BareJid,
        peer: BareJid,
        change: EntryChange,
    },
    ChatItemsUpdated {
        account: BareJid,
        peer: Option<BareJid>,
        action: ChatAction,
    },
}

impl HistoryEvent {
    /// Direction of a newly stored message; `None` for other notifications.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            HistoryEvent::MessageNew { state, .. } => Some(state.direction()),
            _ => None,
        }
    }

    pub fn account(&self) -> &BareJid {
        match self {
            HistoryEvent::MessageNew { account, .. }
            | HistoryEvent::MessageUpdated { account, .. }
            | HistoryEvent::ChatItemsUpdated { account, .. } => account,
        }
    }
}

/// Session lifecycle signals for observers such as the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    AccountStateChanged {
        account: BareJid,
        state: ConnectionState,
        resumed: bool,
    },
    AuthenticationFailed {
        account: BareJid,
        reason: AuthFailure,
    },
    CertificateRejected {
        account: BareJid,
        /// Leaf and issuer identity; `None` when the server sent no chain.
        certificate: Option<ServerCertificate>,
    },
}

impl SupervisorEvent {
    pub fn account(&self) -> &BareJid {
        match self {
            SupervisorEvent::AccountStateChanged { account, .. }
            | SupervisorEvent::AuthenticationFailed { account, .. }
            | SupervisorEvent::CertificateRejected { account, .. } => account,
        }
    }
}

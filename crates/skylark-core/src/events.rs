// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events emitted by a protocol client on its event registry.
//!
//! The set is closed: consumers match exhaustively, and a handler subscribes
//! to the [`EventKind`]s it cares about.

use chrono::{DateTime, Utc};
use strum::{Display, EnumIter};

use crate::types::{AuthFailure, BareJid, CarbonAction, Jid, PeerCertificate};

/// Stanza `type` attribute of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StanzaKind {
    #[default]
    Chat,
    Normal,
    GroupChat,
    Headline,
    Error,
}

/// Error payload carried by an error-type stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StanzaError {
    pub condition: Option<String>,
    pub text: Option<String>,
}

impl StanzaError {
    /// Human-readable description, falling back to the condition name.
    pub fn describe(&self) -> &str {
        self.text
            .as_deref()
            .or(self.condition.as_deref())
            .unwrap_or("Unknown error")
    }
}

/// Outcome of end-to-end decryption as reported by the protocol library.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decryption {
    #[default]
    NotEncrypted,
    Decrypted { fingerprint: Option<String> },
    NotForThisDevice,
    Failed,
    /// The payload was already decrypted once for this stanza id.
    Duplicate,
}

/// A parsed message stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStanza {
    pub id: Option<String>,
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub kind: StanzaKind,
    pub body: Option<String>,
    /// Out-of-band URL attached to the message.
    pub oob: Option<String>,
    /// Delayed-delivery timestamp, when the server stamped one.
    pub delay: Option<DateTime<Utc>>,
    pub error: Option<StanzaError>,
    pub decryption: Decryption,
}

impl MessageStanza {
    /// A chat message with a body.
    pub fn chat(from: Jid, to: Jid, body: impl Into<String>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == StanzaKind::Error
    }
}

/// Discriminant of [`ProtocolEvent`], used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    MessageReceived,
    CarbonReceived,
    GroupMessageReceived,
    ArchiveMessageReceived,
    DeliveryReceiptReceived,
    Disconnected,
    CertificateError,
    AuthFailed,
    SessionEstablished,
    StreamResumed,
}

impl EventKind {
    /// Kinds the session supervisor reacts to.
    pub const LIFECYCLE: [EventKind; 5] = [
        EventKind::Disconnected,
        EventKind::CertificateError,
        EventKind::AuthFailed,
        EventKind::SessionEstablished,
        EventKind::StreamResumed,
    ];

    /// Kinds the history store reacts to.
    pub const HISTORY: [EventKind; 5] = [
        EventKind::MessageReceived,
        EventKind::CarbonReceived,
        EventKind::GroupMessageReceived,
        EventKind::ArchiveMessageReceived,
        EventKind::DeliveryReceiptReceived,
    ];
}

/// An event emitted by a protocol client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    MessageReceived {
        account: BareJid,
        /// Full address the session is currently bound to.
        own_jid: Option<Jid>,
        message: MessageStanza,
    },
    CarbonReceived {
        account: BareJid,
        action: CarbonAction,
        message: MessageStanza,
    },
    GroupMessageReceived {
        account: BareJid,
        room: BareJid,
        nickname: Option<String>,
        own_nickname: Option<String>,
        author: Option<BareJid>,
        timestamp: DateTime<Utc>,
        message: MessageStanza,
    },
    ArchiveMessageReceived {
        account: BareJid,
        timestamp: DateTime<Utc>,
        message: MessageStanza,
    },
    DeliveryReceiptReceived {
        account: BareJid,
        from: BareJid,
        stanza_id: String,
    },
    Disconnected {
        account: BareJid,
    },
    CertificateError {
        account: BareJid,
        chain: Vec<PeerCertificate>,
    },
    AuthFailed {
        account: BareJid,
        reason: AuthFailure,
    },
    SessionEstablished {
        account: BareJid,
    },
    StreamResumed {
        account: BareJid,
    },
}

impl ProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProtocolEvent::MessageReceived { .. } => EventKind::MessageReceived,
            ProtocolEvent::CarbonReceived { .. } => EventKind::CarbonReceived,
            ProtocolEvent::GroupMessageReceived { .. } => EventKind::GroupMessageReceived,
            ProtocolEvent::ArchiveMessageReceived { .. } => EventKind::ArchiveMessageReceived,
            ProtocolEvent::DeliveryReceiptReceived { .. } => EventKind::DeliveryReceiptReceived,
            ProtocolEvent::Disconnected { .. } => EventKind::Disconnected,
            ProtocolEvent::CertificateError { .. } => EventKind::CertificateError,
            ProtocolEvent::AuthFailed { .. } => EventKind::AuthFailed,
            ProtocolEvent::SessionEstablished { .. } => EventKind::SessionEstablished,
            ProtocolEvent::StreamResumed { .. } => EventKind::StreamResumed,
        }
    }

    /// The account whose session emitted the event.
    pub fn account(&self) -> &BareJid {
        match self {
            ProtocolEvent::MessageReceived { account, .. }
            | ProtocolEvent::CarbonReceived { account, .. }
            | ProtocolEvent::GroupMessageReceived { account, .. }
            | ProtocolEvent::ArchiveMessageReceived { account, .. }
            | ProtocolEvent::DeliveryReceiptReceived { account, .. }
            | ProtocolEvent::Disconnected { account }
            | ProtocolEvent::CertificateError { account, .. }
            | ProtocolEvent::AuthFailed { account, .. }
            | ProtocolEvent::SessionEstablished { account }
            | ProtocolEvent::StreamResumed { account } => account,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn lifecycle_and_history_kinds_partition_all_kinds() {
        let mut covered: Vec<EventKind> = EventKind::LIFECYCLE
            .iter()
            .chain(EventKind::HISTORY.iter())
            .copied()
            .collect();
        covered.sort_by_key(|k| k.to_string());
        covered.dedup();
        assert_eq!(covered.len(), EventKind::iter().count());
    }

    #[test]
    fn stanza_error_description_falls_back() {
        let err = StanzaError {
            condition: Some("item-not-found".into()),
            text: None,
        };
        assert_eq!(err.describe(), "item-not-found");
        assert_eq!(StanzaError::default().describe(), "Unknown error");
    }

    #[test]
    fn event_accessors() {
        let account = BareJid::new("me@example.org").unwrap();
        let event = ProtocolEvent::Disconnected {
            account: account.clone(),
        };
        assert_eq!(event.kind(), EventKind::Disconnected);
        assert_eq!(event.account(), &account);
        assert_eq!(event.kind().to_string(), "disconnected");
    }
}

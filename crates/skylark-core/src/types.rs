// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the history store, the session supervisor and the
//! protocol seam.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::error::SkylarkError;

/// Bare messaging address (`local@domain` or `domain`), without a resource.
///
/// The domain part is normalized to lowercase; the local part is kept as
/// given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BareJid(String);

impl BareJid {
    /// Parse and normalize a bare address.
    pub fn new(raw: &str) -> Result<Self, SkylarkError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains(char::is_whitespace)
        {
            return Err(SkylarkError::InvalidAddress(raw.to_string()));
        }
        let normalized = match trimmed.split_once('@') {
            Some((local, domain)) => {
                if local.is_empty() || domain.is_empty() || domain.contains('@') {
                    return Err(SkylarkError::InvalidAddress(raw.to_string()));
                }
                format!("{local}@{}", domain.to_ascii_lowercase())
            }
            None => trimmed.to_ascii_lowercase(),
        };
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local part, if the address has one.
    pub fn local(&self) -> Option<&str> {
        self.0.split_once('@').map(|(local, _)| local)
    }

    /// The server domain of the address.
    pub fn domain(&self) -> &str {
        match self.0.split_once('@') {
            Some((_, domain)) => domain,
            None => &self.0,
        }
    }
}

impl fmt::Display for BareJid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BareJid {
    type Err = SkylarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BareJid {
    type Error = SkylarkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<BareJid> for String {
    fn from(value: BareJid) -> Self {
        value.0
    }
}

/// Full messaging address: a bare address plus an optional resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    bare: BareJid,
    resource: Option<String>,
}

impl Jid {
    pub fn new(bare: BareJid, resource: Option<&str>) -> Self {
        Self {
            bare,
            resource: resource.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    pub fn bare(&self) -> &BareJid {
        &self.bare
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
}

impl From<BareJid> for Jid {
    fn from(bare: BareJid) -> Self {
        Self {
            bare,
            resource: None,
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", self.bare, resource),
            None => write!(f, "{}", self.bare),
        }
    }
}

impl FromStr for Jid {
    type Err = SkylarkError;

    /// Resources may themselves contain `/`, so only the first one splits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((bare, resource)) => Ok(Self::new(BareJid::new(bare)?, Some(resource))),
            None => Ok(Self::new(BareJid::new(s)?, None)),
        }
    }
}

/// Row id of a persisted history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted integer that does not map to a known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} value {value}")]
pub struct UnknownDiscriminant {
    pub kind: &'static str,
    pub value: i64,
}

/// Which side authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Delivery phase projected from a [`MessageState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPhase {
    Unsent,
    Sent,
    Delivered,
    Read,
    Error,
}

/// State of a history entry. Integer values are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Incoming = 0,
    Outgoing = 1,
    IncomingUnread = 2,
    OutgoingUnsent = 3,
    OutgoingDelivered = 4,
    OutgoingRead = 5,
    OutgoingErrorUnread = 6,
    OutgoingError = 7,
    IncomingErrorUnread = 8,
    IncomingError = 9,
}

impl MessageState {
    pub const ALL: [MessageState; 10] = [
        MessageState::Incoming,
        MessageState::Outgoing,
        MessageState::IncomingUnread,
        MessageState::OutgoingUnsent,
        MessageState::OutgoingDelivered,
        MessageState::OutgoingRead,
        MessageState::OutgoingErrorUnread,
        MessageState::OutgoingError,
        MessageState::IncomingErrorUnread,
        MessageState::IncomingError,
    ];

    /// States that count towards a conversation's unread total.
    pub const UNREAD: [MessageState; 3] = [
        MessageState::IncomingUnread,
        MessageState::IncomingErrorUnread,
        MessageState::OutgoingErrorUnread,
    ];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn direction(self) -> Direction {
        match self {
            MessageState::Incoming
            | MessageState::IncomingUnread
            | MessageState::IncomingErrorUnread
            | MessageState::IncomingError => Direction::Incoming,
            MessageState::Outgoing
            | MessageState::OutgoingUnsent
            | MessageState::OutgoingDelivered
            | MessageState::OutgoingRead
            | MessageState::OutgoingErrorUnread
            | MessageState::OutgoingError => Direction::Outgoing,
        }
    }

    pub fn phase(self) -> DeliveryPhase {
        match self {
            MessageState::OutgoingUnsent => DeliveryPhase::Unsent,
            MessageState::Outgoing => DeliveryPhase::Sent,
            MessageState::IncomingUnread | MessageState::OutgoingDelivered => {
                DeliveryPhase::Delivered
            }
            MessageState::Incoming | MessageState::OutgoingRead => DeliveryPhase::Read,
            MessageState::OutgoingErrorUnread
            | MessageState::OutgoingError
            | MessageState::IncomingErrorUnread
            | MessageState::IncomingError => DeliveryPhase::Error,
        }
    }

    pub fn is_error(self) -> bool {
        self.phase() == DeliveryPhase::Error
    }

    pub fn is_unread(self) -> bool {
        Self::UNREAD.contains(&self)
    }

    /// The state an unread entry moves to when its conversation is read.
    pub fn read_equivalent(self) -> Option<MessageState> {
        match self {
            MessageState::IncomingUnread => Some(MessageState::Incoming),
            MessageState::IncomingErrorUnread => Some(MessageState::IncomingError),
            MessageState::OutgoingErrorUnread => Some(MessageState::OutgoingError),
            _ => None,
        }
    }

    /// Initial state of an entry about to be appended.
    ///
    /// Archive entries were already seen on another device, so they are never
    /// unread. Outgoing entries without an error are `Outgoing` either way.
    pub fn for_new_entry(direction: Direction, error: bool, from_archive: bool) -> MessageState {
        match (direction, error, from_archive) {
            (Direction::Incoming, true, true) => MessageState::IncomingError,
            (Direction::Incoming, true, false) => MessageState::IncomingErrorUnread,
            (Direction::Incoming, false, true) => MessageState::Incoming,
            (Direction::Incoming, false, false) => MessageState::IncomingUnread,
            (Direction::Outgoing, true, true) => MessageState::OutgoingError,
            (Direction::Outgoing, true, false) => MessageState::OutgoingErrorUnread,
            (Direction::Outgoing, false, _) => MessageState::Outgoing,
        }
    }

    /// Whether the store may move an entry from `self` to `next`.
    pub fn can_transition_to(self, next: MessageState) -> bool {
        matches!(
            (self, next),
            (MessageState::Outgoing, MessageState::OutgoingDelivered)
                | (MessageState::Outgoing, MessageState::OutgoingErrorUnread)
                | (MessageState::IncomingUnread, MessageState::Incoming)
                | (MessageState::IncomingErrorUnread, MessageState::IncomingError)
                | (MessageState::OutgoingErrorUnread, MessageState::OutgoingError)
        )
    }
}

impl TryFrom<i64> for MessageState {
    type Error = UnknownDiscriminant;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        MessageState::ALL
            .into_iter()
            .find(|state| state.as_i64() == value)
            .ok_or(UnknownDiscriminant {
                kind: "message state",
                value,
            })
    }
}

/// Kind of history item. Only plain messages are stored today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message = 0,
}

impl ItemType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for ItemType {
    type Error = UnknownDiscriminant;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ItemType::Message),
            other => Err(UnknownDiscriminant {
                kind: "item type",
                value: other,
            }),
        }
    }
}

/// End-to-end encryption outcome recorded with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None = 0,
    Decrypted = 1,
    DecryptionFailed = 2,
    NotForThisDevice = 3,
}

impl Encryption {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Encryption {
    type Error = UnknownDiscriminant;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encryption::None),
            1 => Ok(Encryption::Decrypted),
            2 => Ok(Encryption::DecryptionFailed),
            3 => Ok(Encryption::NotForThisDevice),
            other => Err(UnknownDiscriminant {
                kind: "encryption",
                value: other,
            }),
        }
    }
}

/// A persisted history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub id: EntryId,
    pub account: BareJid,
    pub peer: BareJid,
    pub author: Option<BareJid>,
    pub author_nickname: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub item_type: ItemType,
    pub body: String,
    pub stanza_id: Option<String>,
    pub state: MessageState,
    pub encryption: Encryption,
    pub fingerprint: Option<String>,
    pub preview: Option<String>,
    pub error: Option<String>,
}

/// Connection state of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Whether the host application is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    #[default]
    Foreground,
    Background,
}

/// Reason reported by the protocol library for a failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// The attempt was cancelled locally; not a credential problem.
    Aborted,
    NotAuthorized,
    AccountDisabled,
    CredentialsExpired,
    MechanismTooWeak,
    Other(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::Aborted => f.write_str("aborted"),
            AuthFailure::NotAuthorized => f.write_str("not_authorized"),
            AuthFailure::AccountDisabled => f.write_str("account_disabled"),
            AuthFailure::CredentialsExpired => f.write_str("credentials_expired"),
            AuthFailure::MechanismTooWeak => f.write_str("mechanism_too_weak"),
            AuthFailure::Other(condition) => f.write_str(condition),
        }
    }
}

impl AuthFailure {
    pub fn is_voluntary_abort(&self) -> bool {
        matches!(self, AuthFailure::Aborted)
    }
}

/// Whether a carbon copy reflects a message we received or one we sent
/// from another device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum CarbonAction {
    Received,
    Sent,
}

/// Last error recorded for an account, shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastError {
    #[strum(serialize = "auth")]
    Auth,
    #[strum(serialize = "cert")]
    Certificate,
}

/// One certificate of a chain presented by the server during TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    /// DER-encoded certificate bytes.
    pub der: Vec<u8>,
    /// Human-readable subject summary.
    pub subject: String,
}

/// A server certificate remembered for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCertificate {
    pub cert_name: String,
    pub cert_hash_sha1: String,
    pub issuer_name: Option<String>,
    pub issuer_hash_sha1: Option<String>,
    /// Set once the user explicitly accepted this certificate.
    pub accepted: bool,
}

/// Per-account configuration owned by the account directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub jid: BareJid,
    pub active: bool,
    pub push_enabled: bool,
    pub server_certificate: Option<ServerCertificate>,
}

impl AccountConfig {
    pub fn new(jid: BareJid) -> Self {
        Self {
            jid,
            active: true,
            push_enabled: false,
            server_certificate: None,
        }
    }
}

/// Settings applied to a protocol client before login.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub password: SecretString,
    pub resource: String,
    pub push_enabled: bool,
}

/// Which page of an archive query to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// The newest page after the query start.
    Last { max: u32 },
    /// The page immediately preceding `cursor`.
    Before { cursor: String, max: u32 },
}

/// A message-archive query for everything newer than `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub query_id: String,
    pub start: DateTime<Utc>,
    pub page: PageRequest,
}

/// Result-set information returned for one archive page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePage {
    /// Number of messages delivered in this page.
    pub received: u32,
    /// Cursor of the first item in the page.
    pub first: Option<String>,
    /// Absolute index of the first item in the full result set.
    pub index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bare_jid_normalizes_domain() {
        let jid = BareJid::new("Alice@Example.ORG").unwrap();
        assert_eq!(jid.as_str(), "Alice@example.org");
        assert_eq!(jid.local(), Some("Alice"));
        assert_eq!(jid.domain(), "example.org");
    }

    #[test]
    fn bare_jid_rejects_resource_and_empty_parts() {
        assert!(BareJid::new("").is_err());
        assert!(BareJid::new("a@b/c").is_err());
        assert!(BareJid::new("@b").is_err());
        assert!(BareJid::new("a@").is_err());
        assert!(BareJid::new("a@b@c").is_err());
    }

    #[test]
    fn full_jid_splits_on_first_slash() {
        let jid: Jid = "bob@example.org/phone/1".parse().unwrap();
        assert_eq!(jid.bare().as_str(), "bob@example.org");
        assert_eq!(jid.resource(), Some("phone/1"));
        assert_eq!(jid.to_string(), "bob@example.org/phone/1");
    }

    #[test]
    fn bare_jid_serde_roundtrip_rejects_invalid() {
        let parsed: BareJid = serde_json::from_str("\"a@example.org\"").unwrap();
        assert_eq!(parsed.as_str(), "a@example.org");
        assert!(serde_json::from_str::<BareJid>("\"a@b/c\"").is_err());
    }

    #[test]
    fn state_values_are_stable() {
        let values: Vec<i64> = MessageState::ALL.iter().map(|s| s.as_i64()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert!(MessageState::try_from(10).is_err());
        assert_eq!(
            MessageState::try_from(6).unwrap(),
            MessageState::OutgoingErrorUnread
        );
    }

    #[test]
    fn new_entry_state_table() {
        use Direction::*;
        assert_eq!(
            MessageState::for_new_entry(Incoming, true, true),
            MessageState::IncomingError
        );
        assert_eq!(
            MessageState::for_new_entry(Incoming, true, false),
            MessageState::IncomingErrorUnread
        );
        assert_eq!(
            MessageState::for_new_entry(Incoming, false, true),
            MessageState::Incoming
        );
        assert_eq!(
            MessageState::for_new_entry(Incoming, false, false),
            MessageState::IncomingUnread
        );
        assert_eq!(
            MessageState::for_new_entry(Outgoing, true, true),
            MessageState::OutgoingError
        );
        assert_eq!(
            MessageState::for_new_entry(Outgoing, true, false),
            MessageState::OutgoingErrorUnread
        );
        assert_eq!(
            MessageState::for_new_entry(Outgoing, false, false),
            MessageState::Outgoing
        );
    }

    #[test]
    fn auth_failure_display() {
        assert_eq!(AuthFailure::NotAuthorized.to_string(), "not_authorized");
        assert_eq!(AuthFailure::Other("policy".into()).to_string(), "policy");
        assert!(AuthFailure::Aborted.is_voluntary_abort());
    }

    #[test]
    fn last_error_strings() {
        assert_eq!(LastError::Auth.to_string(), "auth");
        assert_eq!(LastError::Certificate.to_string(), "cert");
        assert_eq!("cert".parse::<LastError>().unwrap(), LastError::Certificate);
    }

    fn any_state() -> impl Strategy<Value = MessageState> {
        (0usize..10).prop_map(|i| MessageState::ALL[i])
    }

    proptest! {
        #[test]
        fn unread_states_are_exactly_those_with_read_equivalent(state in any_state()) {
            prop_assert_eq!(state.is_unread(), state.read_equivalent().is_some());
        }

        #[test]
        fn read_equivalent_keeps_direction_and_phase(state in any_state()) {
            if let Some(read) = state.read_equivalent() {
                prop_assert_eq!(read.direction(), state.direction());
                prop_assert!(!read.is_unread());
                prop_assert!(state.can_transition_to(read));
                if state.is_error() {
                    prop_assert!(read.is_error());
                }
            }
        }

        #[test]
        fn transitions_never_change_direction(from in any_state(), to in any_state()) {
            if from.can_transition_to(to) {
                prop_assert_eq!(from.direction(), to.direction());
                prop_assert_ne!(from, to);
            }
        }

        #[test]
        fn discriminant_roundtrip(state in any_state()) {
            prop_assert_eq!(MessageState::try_from(state.as_i64()).unwrap(), state);
        }
    }
}

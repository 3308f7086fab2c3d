// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol event handler feeding the history store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skylark_core::events::{Decryption, MessageStanza, ProtocolEvent, StanzaError};
use skylark_core::types::{CarbonAction, Direction, Encryption, ItemType};
use skylark_core::{BareJid, EventHandler, Jid, SkylarkError};
use tracing::{debug, error, trace};

use crate::models::NewEntry;
use crate::store::ChatHistoryStore;

const NOT_FOR_THIS_DEVICE: &str = "Message was not encrypted for this device.";
const DECRYPTION_FAILED: &str = "Message decryption failed!";

/// Renderable text of a stanza and the encryption mode it is stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBody {
    pub body: Option<String>,
    pub encryption: Encryption,
    pub fingerprint: Option<String>,
}

/// Derive the stored body from a stanza.
///
/// The body is the message text, else the out-of-band URL, else a
/// decryption failure notice. Error stanzas are wrapped with their error
/// description and never keep a fingerprint.
pub fn prepare_body(message: &MessageStanza) -> PreparedBody {
    let (encryption, fingerprint, notice) = match &message.decryption {
        Decryption::NotEncrypted | Decryption::Duplicate => (Encryption::None, None, None),
        Decryption::Decrypted { fingerprint } => (Encryption::Decrypted, fingerprint.clone(), None),
        Decryption::NotForThisDevice => (Encryption::NotForThisDevice, None, Some(NOT_FOR_THIS_DEVICE)),
        Decryption::Failed => (Encryption::DecryptionFailed, None, Some(DECRYPTION_FAILED)),
    };

    let body = message
        .body
        .clone()
        .or_else(|| message.oob.clone())
        .or_else(|| notice.map(str::to_string));

    match (body, message.is_error()) {
        (Some(body), true) => {
            let description = message.error.as_ref().map_or("Unknown error", StanzaError::describe);
            PreparedBody {
                body: Some(format!("Error: {description}\n------\n{body}")),
                encryption,
                fingerprint: None,
            }
        }
        (body, _) => PreparedBody {
            body,
            encryption,
            fingerprint,
        },
    }
}

/// Applies message and receipt events to a [`ChatHistoryStore`].
pub struct HistoryEventHandler {
    store: Arc<ChatHistoryStore>,
}

impl HistoryEventHandler {
    pub fn new(store: Arc<ChatHistoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ChatHistoryStore> {
        &self.store
    }

    /// Apply one event, surfacing storage failures.
    pub async fn apply(&self, event: &ProtocolEvent) -> Result<(), SkylarkError> {
        match event {
            ProtocolEvent::MessageReceived {
                account,
                own_jid,
                message,
            } => {
                let incoming = match (&message.from, own_jid) {
                    (Some(from), Some(own)) => from != own,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                let timestamp = message.delay.unwrap_or_else(Utc::now);
                self.append_direct(account, message, incoming, timestamp, false, None)
                    .await
            }
            ProtocolEvent::CarbonReceived {
                account,
                action,
                message,
            } => {
                let incoming = from_other(message, account);
                let timestamp = message.delay.unwrap_or_else(Utc::now);
                self.append_direct(account, message, incoming, timestamp, false, Some(*action))
                    .await
            }
            ProtocolEvent::ArchiveMessageReceived {
                account,
                timestamp,
                message,
            } => {
                let incoming = from_other(message, account);
                self.append_direct(account, message, incoming, *timestamp, true, None)
                    .await
            }
            ProtocolEvent::GroupMessageReceived {
                account,
                room,
                nickname,
                own_nickname,
                author,
                timestamp,
                message,
            } => {
                let Some(prepared) = self.prepare(account, room, message, *timestamp).await? else {
                    return Ok(());
                };
                let direction = if nickname != own_nickname {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                };
                let entry = NewEntry {
                    account: account.clone(),
                    peer: room.clone(),
                    direction,
                    author: author.clone(),
                    author_nickname: nickname.clone(),
                    item_type: ItemType::Message,
                    body: prepared.body,
                    timestamp: *timestamp,
                    stanza_id: message.id.clone(),
                    error: stanza_error(message),
                    encryption: prepared.encryption,
                    fingerprint: prepared.fingerprint,
                    from_archive: false,
                    carbon: None,
                };
                let outcome = self.store.append(entry).await?;
                trace!(account = %account, room = %room, ?outcome, "group message applied");
                Ok(())
            }
            ProtocolEvent::DeliveryReceiptReceived {
                account,
                from,
                stanza_id,
            } => {
                let delivered = self.store.mark_delivered(account, from, stanza_id).await?;
                if delivered.is_none() {
                    debug!(account = %account, peer = %from, stanza_id = %stanza_id, "receipt matched no sent message");
                }
                Ok(())
            }
            ProtocolEvent::Disconnected { .. }
            | ProtocolEvent::CertificateError { .. }
            | ProtocolEvent::AuthFailed { .. }
            | ProtocolEvent::SessionEstablished { .. }
            | ProtocolEvent::StreamResumed { .. } => Ok(()),
        }
    }

    async fn append_direct(
        &self,
        account: &BareJid,
        message: &MessageStanza,
        incoming: bool,
        timestamp: DateTime<Utc>,
        from_archive: bool,
        carbon: Option<CarbonAction>,
    ) -> Result<(), SkylarkError> {
        let (peer, direction) = if incoming {
            (message.from.as_ref(), Direction::Incoming)
        } else {
            (message.to.as_ref(), Direction::Outgoing)
        };
        let Some(peer) = peer.map(Jid::bare).cloned() else {
            debug!(account = %account, "message without a peer address, skipping");
            return Ok(());
        };
        let Some(prepared) = self.prepare(account, &peer, message, timestamp).await? else {
            return Ok(());
        };

        let author = if incoming { peer.clone() } else { account.clone() };
        let entry = NewEntry {
            account: account.clone(),
            peer,
            direction,
            author: Some(author),
            author_nickname: None,
            item_type: ItemType::Message,
            body: prepared.body,
            timestamp,
            stanza_id: message.id.clone(),
            error: stanza_error(message),
            encryption: prepared.encryption,
            fingerprint: prepared.fingerprint,
            from_archive,
            carbon,
        };
        let outcome = self.store.append(entry).await?;
        trace!(account = %account, ?outcome, from_archive, "message applied");
        Ok(())
    }

    /// Prepare the body, dropping payloads already decrypted and stored once.
    async fn prepare(
        &self,
        account: &BareJid,
        peer: &BareJid,
        message: &MessageStanza,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PreparedBody>, SkylarkError> {
        if message.decryption == Decryption::Duplicate {
            if let Some(id) = message.id.as_deref() {
                if self.store.contains_stanza(account, peer, id, timestamp).await? {
                    debug!(account = %account, peer = %peer, stanza_id = id, "duplicate encrypted payload dropped");
                    return Ok(None);
                }
            }
        }
        Ok(Some(prepare_body(message)))
    }
}

fn from_other(message: &MessageStanza, account: &BareJid) -> bool {
    message
        .from
        .as_ref()
        .is_some_and(|from| from.bare() != account)
}

fn stanza_error(message: &MessageStanza) -> Option<StanzaError> {
    message
        .is_error()
        .then(|| message.error.clone().unwrap_or_default())
}

#[async_trait]
impl EventHandler for HistoryEventHandler {
    async fn handle(&self, event: &ProtocolEvent) {
        if let Err(e) = self.apply(event).await {
            error!(account = %event.account(), kind = %event.kind(), error = %e, "failed to apply event to history");
        }
    }
}

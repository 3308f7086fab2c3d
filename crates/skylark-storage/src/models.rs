// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Input and outcome types of the history store.

use chrono::{DateTime, Utc};
use skylark_core::events::StanzaError;
use skylark_core::types::{CarbonAction, Direction, Encryption, ItemType, MessageState};
use skylark_core::{BareJid, EntryId};

/// A message about to be appended to the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub account: BareJid,
    pub peer: BareJid,
    pub direction: Direction,
    pub author: Option<BareJid>,
    pub author_nickname: Option<String>,
    pub item_type: ItemType,
    /// Renderable text. `None` makes the append a no-op.
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub stanza_id: Option<String>,
    /// Present when the triggering stanza was of type `error`.
    pub error: Option<StanzaError>,
    pub encryption: Encryption,
    pub fingerprint: Option<String>,
    /// Replayed from the server archive rather than received live.
    pub from_archive: bool,
    pub carbon: Option<CarbonAction>,
}

impl NewEntry {
    pub fn new(
        account: BareJid,
        peer: BareJid,
        direction: Direction,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            account,
            peer,
            direction,
            author: None,
            author_nickname: None,
            item_type: ItemType::Message,
            body: Some(body.into()),
            timestamp,
            stanza_id: None,
            error: None,
            encryption: Encryption::None,
            fingerprint: None,
            from_archive: false,
            carbon: None,
        }
    }

    pub fn with_stanza_id(mut self, id: impl Into<String>) -> Self {
        self.stanza_id = Some(id.into());
        self
    }

    pub fn with_author(mut self, author: BareJid) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_error(mut self, error: StanzaError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn archived(mut self) -> Self {
        self.from_archive = true;
        self
    }

    /// State the entry will be stored with.
    pub fn state(&self) -> MessageState {
        MessageState::for_new_entry(self.direction, self.error.is_some(), self.from_archive)
    }
}

/// Result of [`ChatHistoryStore::append`](crate::ChatHistoryStore::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(EntryId),
    /// An equivalent entry already exists; nothing was written.
    Duplicate,
    /// No body to store; nothing was written.
    NoBody,
    /// The error stanza matched a sent message, which was marked failed.
    RoutedToError(EntryId),
}

impl AppendOutcome {
    pub fn entry_id(&self) -> Option<EntryId> {
        match self {
            AppendOutcome::Inserted(id) | AppendOutcome::RoutedToError(id) => Some(*id),
            AppendOutcome::Duplicate | AppendOutcome::NoBody => None,
        }
    }
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chat history store.
//!
//! Mutations run as closures on the writer connection's single thread, each
//! in one transaction, and publish their notification from that thread after
//! commit. Notification order therefore matches mutation order. Reads run on
//! the reader connection and never wait for writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skylark_bus::{ChatAction, EntryChange, Envelope, EventBus, HistoryEvent};
use skylark_config::SkylarkConfig;
use skylark_core::types::{ItemType, MessageEntry, MessageState};
use skylark_core::{BareJid, EntryId, SkylarkError, SyncWatermark};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::database::{Database, map_tr_err};
use crate::dedup::{DedupWindows, DuplicateProbe, is_duplicate};
use crate::models::{AppendOutcome, NewEntry};
use crate::queries::{conversations, history};
use crate::statements;

const UNKNOWN_ERROR: &str = "Unknown error";

/// Deduplicated, ordered message history with change notifications.
pub struct ChatHistoryStore {
    db: Database,
    windows: DedupWindows,
    bus: EventBus<HistoryEvent>,
}

impl ChatHistoryStore {
    /// Wrap an open database and prepare every statement once.
    pub async fn new(
        db: Database,
        windows: DedupWindows,
        bus: EventBus<HistoryEvent>,
    ) -> Result<Self, SkylarkError> {
        db.writer()
            .call(|conn| -> rusqlite::Result<()> { statements::warm(conn, statements::WRITER) })
            .await
            .map_err(map_tr_err)?;
        db.reader()
            .call(|conn| -> rusqlite::Result<()> { statements::warm(conn, statements::READER) })
            .await
            .map_err(map_tr_err)?;
        Ok(Self { db, windows, bus })
    }

    /// Open the configured database and build a store around it.
    pub async fn open(config: &SkylarkConfig) -> Result<Self, SkylarkError> {
        let db = Database::open(&config.storage.database_path, config.storage.wal_mode).await?;
        let bus = EventBus::new(config.history.notification_capacity);
        Self::new(db, DedupWindows::from(&config.history), bus).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<HistoryEvent>> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus<HistoryEvent> {
        &self.bus
    }

    pub fn dedup_windows(&self) -> DedupWindows {
        self.windows
    }

    pub async fn close(&self) -> Result<(), SkylarkError> {
        self.db.close().await
    }

    /// Append a message.
    ///
    /// An error stanza that names a stanza id first tries to mark the matching
    /// sent message failed. Otherwise the entry is checked for duplicates,
    /// inserted and the conversation watermark advanced, all in one
    /// transaction.
    pub async fn append(&self, entry: NewEntry) -> Result<AppendOutcome, SkylarkError> {
        let Some(body) = entry.body.clone() else {
            debug!(account = %entry.account, peer = %entry.peer, "no body, nothing to store");
            return Ok(AppendOutcome::NoBody);
        };
        let windows = self.windows;
        let bus = self.bus.clone();

        self.db
            .writer()
            .call(move |conn| -> rusqlite::Result<AppendOutcome> {
                let state = entry.state();
                let error_text = entry.error.as_ref().map(|e| e.describe().to_string());
                let tx = conn.transaction()?;

                if state.is_error() {
                    if let Some(stanza_id) = entry.stanza_id.as_deref() {
                        let hit = history::find_outgoing(&tx, &entry.account, &entry.peer, stanza_id)?;
                        if let Some((id, _)) = hit {
                            let text = error_text.as_deref().unwrap_or(UNKNOWN_ERROR);
                            let changed = history::mark_outgoing_error(&tx, id, text)?;
                            tx.commit()?;
                            if changed {
                                bus.publish(HistoryEvent::MessageUpdated {
                                    entry_id: id,
                                    account: entry.account.clone(),
                                    peer: entry.peer.clone(),
                                    change: EntryChange::State(MessageState::OutgoingErrorUnread),
                                });
                            }
                            return Ok(AppendOutcome::RoutedToError(id));
                        }
                    }
                }

                let probe = DuplicateProbe {
                    account: &entry.account,
                    peer: &entry.peer,
                    item_type: entry.item_type,
                    timestamp: entry.timestamp,
                    stanza_id: entry.stanza_id.as_deref(),
                    body: Some(&body),
                    author: entry.author.as_ref(),
                    author_nickname: entry.author_nickname.as_deref(),
                };
                if is_duplicate(&tx, &windows, &probe)? {
                    return Ok(AppendOutcome::Duplicate);
                }

                let id = history::insert_entry(&tx, &entry, &body, state, error_text.as_deref())?;
                conversations::advance_watermark(&tx, &entry.account, &entry.peer, entry.timestamp)?;
                tx.commit()?;

                bus.publish(HistoryEvent::MessageNew {
                    entry_id: id,
                    account: entry.account,
                    peer: entry.peer,
                    author_nickname: entry.author_nickname,
                    timestamp: entry.timestamp,
                    body,
                    state,
                    encryption: entry.encryption,
                    from_archive: entry.from_archive,
                    carbon: entry.carbon,
                });
                Ok(AppendOutcome::Inserted(id))
            })
            .await
            .map_err(map_tr_err)
    }

    /// Mark a sent message as failed.
    ///
    /// Returns `true` when an outgoing-direction entry with this stanza id
    /// exists. Only an entry still in `outgoing` changes state; the error text
    /// is `text`, else `condition`, else a generic fallback.
    pub async fn mark_outgoing_error(
        &self,
        account: &BareJid,
        peer: &BareJid,
        stanza_id: &str,
        condition: Option<&str>,
        text: Option<&str>,
    ) -> Result<bool, SkylarkError> {
        let (account, peer, stanza_id) = (account.clone(), peer.clone(), stanza_id.to_string());
        let error_text = text.or(condition).unwrap_or(UNKNOWN_ERROR).to_string();
        let bus = self.bus.clone();

        self.db
            .writer()
            .call(move |conn| -> rusqlite::Result<bool> {
                let Some((id, _)) = history::find_outgoing(conn, &account, &peer, &stanza_id)? else {
                    return Ok(false);
                };
                if history::mark_outgoing_error(conn, id, &error_text)? {
                    bus.publish(HistoryEvent::MessageUpdated {
                        entry_id: id,
                        account,
                        peer,
                        change: EntryChange::State(MessageState::OutgoingErrorUnread),
                    });
                }
                Ok(true)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Record a delivery receipt: `outgoing -> outgoing_delivered` only.
    pub async fn mark_delivered(
        &self,
        account: &BareJid,
        peer: &BareJid,
        stanza_id: &str,
    ) -> Result<Option<EntryId>, SkylarkError> {
        let (account, peer, stanza_id) = (account.clone(), peer.clone(), stanza_id.to_string());
        let bus = self.bus.clone();

        self.db
            .writer()
            .call(move |conn| -> rusqlite::Result<Option<EntryId>> {
                let Some((id, state)) = history::find_outgoing(conn, &account, &peer, &stanza_id)? else {
                    return Ok(None);
                };
                if !history::change_state(conn, id, state, MessageState::OutgoingDelivered)? {
                    return Ok(None);
                }
                bus.publish(HistoryEvent::MessageUpdated {
                    entry_id: id,
                    account,
                    peer,
                    change: EntryChange::State(MessageState::OutgoingDelivered),
                });
                Ok(Some(id))
            })
            .await
            .map_err(map_tr_err)
    }

    /// Mark every unread entry of the conversation read. Returns whether
    /// anything changed.
    pub async fn mark_all_read(&self, account: &BareJid, peer: &BareJid) -> Result<bool, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        let bus = self.bus.clone();

        self.db
            .writer()
            .call(move |conn| -> rusqlite::Result<bool> {
                let changed = history::mark_all_read(conn, &account, &peer)?;
                if changed == 0 {
                    return Ok(false);
                }
                bus.publish(HistoryEvent::ChatItemsUpdated {
                    account,
                    peer: Some(peer),
                    action: ChatAction::MarkedRead,
                });
                Ok(true)
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn update_preview(&self, id: EntryId, preview: Option<&str>) -> Result<bool, SkylarkError> {
        let preview = preview.map(str::to_string);
        let bus = self.bus.clone();

        self.db
            .writer()
            .call(move |conn| -> rusqlite::Result<bool> {
                let Some((account, peer)) = history::update_preview(conn, id, preview.as_deref())? else {
                    return Ok(false);
                };
                bus.publish(HistoryEvent::MessageUpdated {
                    entry_id: id,
                    account,
                    peer,
                    change: EntryChange::Preview(preview),
                });
                Ok(true)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Drop a preview wherever it is referenced, e.g. after its cached
    /// resource was evicted. Returns the number of entries touched.
    pub async fn clear_preview(&self, preview: &str) -> Result<u64, SkylarkError> {
        let preview = preview.to_string();
        let cleared = self
            .db
            .writer()
            .call(move |conn| -> rusqlite::Result<usize> { history::clear_preview(conn, &preview) })
            .await
            .map_err(map_tr_err)?;
        Ok(cleared as u64)
    }

    /// Delete every entry of one conversation. Returns the number deleted.
    pub async fn delete_conversation(&self, account: &BareJid, peer: &BareJid) -> Result<u64, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        let bus = self.bus.clone();

        let deleted = self
            .db
            .writer()
            .call(move |conn| -> rusqlite::Result<usize> {
                let deleted = history::delete_conversation(conn, &account, &peer)?;
                if deleted > 0 {
                    bus.publish(HistoryEvent::ChatItemsUpdated {
                        account,
                        peer: Some(peer),
                        action: ChatAction::Removed,
                    });
                }
                Ok(deleted)
            })
            .await
            .map_err(map_tr_err)?;
        Ok(deleted as u64)
    }

    /// Delete an account's whole history and conversation watermarks.
    pub async fn delete_account(&self, account: &BareJid) -> Result<u64, SkylarkError> {
        let account = account.clone();
        let bus = self.bus.clone();

        let deleted = self
            .db
            .writer()
            .call(move |conn| -> rusqlite::Result<usize> {
                let tx = conn.transaction()?;
                let deleted = history::delete_account(&tx, &account)?;
                let chats = conversations::delete_account(&tx, &account)?;
                tx.commit()?;
                if deleted > 0 || chats > 0 {
                    bus.publish(HistoryEvent::ChatItemsUpdated {
                        account,
                        peer: None,
                        action: ChatAction::Removed,
                    });
                }
                Ok(deleted)
            })
            .await
            .map_err(map_tr_err)?;
        info!(deleted, "account history removed");
        Ok(deleted as u64)
    }

    // --- Reads ---

    pub async fn count(&self, account: &BareJid, peer: &BareJid) -> Result<u64, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<u64> { history::count(conn, &account, &peer) })
            .await
            .map_err(map_tr_err)
    }

    /// Number of conversations with at least one unread entry.
    pub async fn count_unread_conversations(&self) -> Result<u64, SkylarkError> {
        self.db
            .reader()
            .call(|conn| -> rusqlite::Result<u64> { conversations::count_unread(conn) })
            .await
            .map_err(map_tr_err)
    }

    pub async fn unread_conversations(&self) -> Result<Vec<(BareJid, BareJid)>, SkylarkError> {
        self.db
            .reader()
            .call(|conn| -> rusqlite::Result<Vec<(BareJid, BareJid)>> { conversations::list_unread(conn) })
            .await
            .map_err(map_tr_err)
    }

    /// Visit every conversation with unread entries.
    pub async fn for_each_unread_conversation<F>(&self, mut visit: F) -> Result<(), SkylarkError>
    where
        F: FnMut(&BareJid, &BareJid),
    {
        for (account, peer) in self.unread_conversations().await? {
            visit(&account, &peer);
        }
        Ok(())
    }

    /// Entries of a conversation, most recent first.
    pub async fn page(
        &self,
        account: &BareJid,
        peer: &BareJid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageEntry>, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<Vec<MessageEntry>> {
                history::page(conn, &account, &peer, limit, offset)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Zero-based rank of an entry among its conversation's entries by
    /// timestamp: older entries are counted, or newer ones when `inverted`.
    pub async fn position_of(
        &self,
        account: &BareJid,
        peer: &BareJid,
        id: EntryId,
        inverted: bool,
    ) -> Result<Option<u64>, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<Option<u64>> {
                history::position_of(conn, &account, &peer, id, inverted)
            })
            .await
            .map_err(map_tr_err)
    }

    /// The error text recorded for an entry.
    pub async fn message_error(&self, id: EntryId) -> Result<Option<String>, SkylarkError> {
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<Option<String>> { history::error_detail(conn, id) })
            .await
            .map_err(map_tr_err)
    }

    /// Timestamp of the newest entry stored for the account.
    pub async fn last_message_time(&self, account: &BareJid) -> Result<Option<DateTime<Utc>>, SkylarkError> {
        let account = account.clone();
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<Option<DateTime<Utc>>> {
                history::last_message_time(conn, &account)
            })
            .await
            .map_err(map_tr_err)
    }

    /// The conversation's last-activity watermark.
    pub async fn last_activity(
        &self,
        account: &BareJid,
        peer: &BareJid,
    ) -> Result<Option<DateTime<Utc>>, SkylarkError> {
        let (account, peer) = (account.clone(), peer.clone());
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<Option<DateTime<Utc>>> {
                conversations::last_activity(conn, &account, &peer)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Whether an entry with this stanza id was already stored around
    /// `timestamp`, whatever its body.
    pub async fn contains_stanza(
        &self,
        account: &BareJid,
        peer: &BareJid,
        stanza_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, SkylarkError> {
        let (account, peer, stanza_id) = (account.clone(), peer.clone(), stanza_id.to_string());
        let windows = self.windows;
        self.db
            .reader()
            .call(move |conn| -> rusqlite::Result<bool> {
                let probe = DuplicateProbe {
                    account: &account,
                    peer: &peer,
                    item_type: ItemType::Message,
                    timestamp,
                    stanza_id: Some(&stanza_id),
                    body: None,
                    author: None,
                    author_nickname: None,
                };
                is_duplicate(conn, &windows, &probe)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl SyncWatermark for ChatHistoryStore {
    async fn last_synced(&self, account: &BareJid) -> Result<Option<DateTime<Utc>>, SkylarkError> {
        self.last_message_time(account).await
    }
}

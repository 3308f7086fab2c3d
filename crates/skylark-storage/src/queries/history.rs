// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message row reads and guarded state transitions.

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, params};
use skylark_core::types::{Encryption, ItemType, MessageEntry, MessageState};
use skylark_core::{BareJid, EntryId};

use super::{from_millis, jid_column, optional_jid_column, to_millis};
use crate::models::NewEntry;
use crate::statements;

fn conversion<E>(idx: usize) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e))
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageEntry> {
    Ok(MessageEntry {
        id: EntryId(row.get(0)?),
        account: jid_column(row, 1)?,
        peer: jid_column(row, 2)?,
        author: optional_jid_column(row, 3)?,
        author_nickname: row.get(4)?,
        timestamp: from_millis(5, row.get(5)?)?,
        item_type: ItemType::try_from(row.get::<_, i64>(6)?).map_err(conversion(6))?,
        body: row.get(7)?,
        stanza_id: row.get(8)?,
        state: MessageState::try_from(row.get::<_, i64>(9)?).map_err(conversion(9))?,
        encryption: Encryption::try_from(row.get::<_, i64>(10)?).map_err(conversion(10))?,
        fingerprint: row.get(11)?,
        preview: row.get(12)?,
        error: row.get(13)?,
    })
}

/// Insert a new row with an already computed state and body.
pub fn insert_entry(
    conn: &rusqlite::Connection,
    entry: &NewEntry,
    body: &str,
    state: MessageState,
    error_text: Option<&str>,
) -> rusqlite::Result<EntryId> {
    let mut stmt = conn.prepare_cached(statements::INSERT_ENTRY)?;
    stmt.execute(params![
        entry.account.as_str(),
        entry.peer.as_str(),
        entry.author.as_ref().map(BareJid::as_str),
        entry.author_nickname,
        to_millis(entry.timestamp),
        entry.item_type.as_i64(),
        body,
        entry.stanza_id,
        state.as_i64(),
        entry.encryption.as_i64(),
        entry.fingerprint,
        error_text,
    ])?;
    Ok(EntryId(conn.last_insert_rowid()))
}

/// Most recent outgoing-direction row carrying `stanza_id`.
pub fn find_outgoing(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
    stanza_id: &str,
) -> rusqlite::Result<Option<(EntryId, MessageState)>> {
    let mut stmt = conn.prepare_cached(statements::FIND_OUTGOING_BY_STANZA_ID)?;
    stmt.query_row(params![account.as_str(), peer.as_str(), stanza_id], |row| {
        let state = MessageState::try_from(row.get::<_, i64>(1)?).map_err(conversion(1))?;
        Ok((EntryId(row.get(0)?), state))
    })
    .optional()
}

/// Compare-and-set `from -> to`. Returns whether the row changed.
///
/// Transitions the state machine does not allow never reach SQL.
pub fn change_state(
    conn: &rusqlite::Connection,
    id: EntryId,
    from: MessageState,
    to: MessageState,
) -> rusqlite::Result<bool> {
    if !from.can_transition_to(to) {
        return Ok(false);
    }
    let mut stmt = conn.prepare_cached(statements::CHANGE_STATE)?;
    Ok(stmt.execute(params![id.0, to.as_i64(), from.as_i64()])? > 0)
}

/// `outgoing -> outgoing_error_unread` with an error description.
pub fn mark_outgoing_error(
    conn: &rusqlite::Connection,
    id: EntryId,
    error_text: &str,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached(statements::MARK_OUTGOING_ERROR)?;
    let changed = stmt.execute(params![
        id.0,
        MessageState::OutgoingErrorUnread.as_i64(),
        error_text,
        MessageState::Outgoing.as_i64(),
    ])?;
    Ok(changed > 0)
}

/// Move every unread-class row of a conversation to its read equivalent.
pub fn mark_all_read(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(statements::MARK_ALL_READ)?;
    stmt.execute(params![account.as_str(), peer.as_str()])
}

/// Set the preview; returns the entry's conversation when the row exists.
pub fn update_preview(
    conn: &rusqlite::Connection,
    id: EntryId,
    preview: Option<&str>,
) -> rusqlite::Result<Option<(BareJid, BareJid)>> {
    let mut stmt = conn.prepare_cached(statements::UPDATE_PREVIEW)?;
    stmt.query_row(params![id.0, preview], |row| {
        Ok((jid_column(row, 0)?, jid_column(row, 1)?))
    })
    .optional()
}

pub fn clear_preview(conn: &rusqlite::Connection, preview: &str) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(statements::CLEAR_PREVIEW)?;
    stmt.execute(params![preview])
}

pub fn delete_conversation(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(statements::DELETE_CONVERSATION)?;
    stmt.execute(params![account.as_str(), peer.as_str()])
}

pub fn delete_account(conn: &rusqlite::Connection, account: &BareJid) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(statements::DELETE_ACCOUNT_HISTORY)?;
    stmt.execute(params![account.as_str()])
}

pub fn count(conn: &rusqlite::Connection, account: &BareJid, peer: &BareJid) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare_cached(statements::COUNT_ENTRIES)?;
    stmt.query_row(params![account.as_str(), peer.as_str()], |row| row.get(0))
}

/// Newest first; ties on timestamp are broken by insertion order.
pub fn page(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
    limit: u32,
    offset: u32,
) -> rusqlite::Result<Vec<MessageEntry>> {
    let mut stmt = conn.prepare_cached(statements::PAGE_ENTRIES)?;
    let rows = stmt.query_map(
        params![account.as_str(), peer.as_str(), limit, offset],
        entry_from_row,
    )?;
    rows.collect()
}

/// Rank of `id` within its conversation: entries strictly older than it, or
/// strictly newer when `inverted`. `None` if the entry is not part of the
/// conversation.
pub fn position_of(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
    id: EntryId,
    inverted: bool,
) -> rusqlite::Result<Option<u64>> {
    let timestamp: Option<i64> = conn
        .prepare_cached(statements::ENTRY_TIMESTAMP)?
        .query_row(params![id.0, account.as_str(), peer.as_str()], |row| row.get(0))
        .optional()?;
    let Some(timestamp) = timestamp else {
        return Ok(None);
    };

    let sql = if inverted {
        statements::COUNT_NEWER
    } else {
        statements::COUNT_OLDER
    };
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.query_row(
        params![account.as_str(), peer.as_str(), id.0, timestamp],
        |row| row.get(0),
    )
    .map(Some)
}

pub fn error_detail(conn: &rusqlite::Connection, id: EntryId) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare_cached(statements::ENTRY_ERROR)?;
    let detail: Option<Option<String>> = stmt.query_row(params![id.0], |row| row.get(0)).optional()?;
    Ok(detail.flatten())
}

pub fn last_message_time(
    conn: &rusqlite::Connection,
    account: &BareJid,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let mut stmt = conn.prepare_cached(statements::LAST_MESSAGE_TIME)?;
    let newest: Option<i64> = stmt.query_row(params![account.as_str()], |row| row.get(0))?;
    newest.map(|ms| from_millis(0, ms)).transpose()
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation-level queries: activity watermark and unread aggregation.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use skylark_core::BareJid;

use super::{from_millis, jid_column, to_millis};
use crate::statements;

/// Raise the conversation's last-activity timestamp; never lowers it.
/// Returns whether the stored value changed.
pub fn advance_watermark(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
    timestamp: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached(statements::ADVANCE_WATERMARK)?;
    Ok(stmt.execute(params![account.as_str(), peer.as_str(), to_millis(timestamp)])? > 0)
}

pub fn last_activity(
    conn: &rusqlite::Connection,
    account: &BareJid,
    peer: &BareJid,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let mut stmt = conn.prepare_cached(statements::LAST_ACTIVITY)?;
    let ms: Option<i64> = stmt
        .query_row(params![account.as_str(), peer.as_str()], |row| row.get(0))
        .optional()?;
    ms.map(|ms| from_millis(0, ms)).transpose()
}

pub fn delete_account(conn: &rusqlite::Connection, account: &BareJid) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(statements::DELETE_ACCOUNT_CHATS)?;
    stmt.execute(params![account.as_str()])
}

pub fn count_unread(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare_cached(statements::COUNT_UNREAD_CONVERSATIONS)?;
    stmt.query_row([], |row| row.get(0))
}

/// Distinct `(account, peer)` pairs with at least one unread-class row.
pub fn list_unread(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<(BareJid, BareJid)>> {
    let mut stmt = conn.prepare_cached(statements::LIST_UNREAD_CONVERSATIONS)?;
    let rows = stmt.query_map([], |row| Ok((jid_column(row, 0)?, jid_column(row, 1)?)))?;
    rows.collect()
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Duplicate detection for appended messages.
//!
//! The same logical message can arrive live, as a carbon and from archive
//! replay, with or without a stanza id. A candidate is a duplicate when a row
//! of the same conversation and item type lies inside a time window around
//! its timestamp and agrees on every key the candidate supplies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use skylark_config::model::HistoryConfig;
use skylark_core::BareJid;
use skylark_core::types::ItemType;

use crate::statements;

/// Half-widths of the duplicate search window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupWindows {
    pub without_stanza_id: Duration,
    /// Wider, since a stanza id is a strong key and cross-device clocks skew.
    pub with_stanza_id: Duration,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self {
            without_stanza_id: Duration::from_secs(5 * 60),
            with_stanza_id: Duration::from_secs(60 * 60),
        }
    }
}

impl From<&HistoryConfig> for DedupWindows {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            without_stanza_id: config.dedup_window(),
            with_stanza_id: config.dedup_window_with_id(),
        }
    }
}

impl DedupWindows {
    /// Inclusive millisecond range searched around `timestamp`.
    pub fn range(&self, timestamp: DateTime<Utc>, has_stanza_id: bool) -> (i64, i64) {
        let window = if has_stanza_id {
            self.with_stanza_id
        } else {
            self.without_stanza_id
        };
        let half = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let center = timestamp.timestamp_millis();
        (center.saturating_sub(half), center.saturating_add(half))
    }
}

/// Keys a candidate entry is compared on. `None` fields are not compared.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateProbe<'a> {
    pub account: &'a BareJid,
    pub peer: &'a BareJid,
    pub item_type: ItemType,
    pub timestamp: DateTime<Utc>,
    pub stanza_id: Option<&'a str>,
    pub body: Option<&'a str>,
    pub author: Option<&'a BareJid>,
    pub author_nickname: Option<&'a str>,
}

/// Whether a row matching `probe` already exists.
pub fn is_duplicate(
    conn: &rusqlite::Connection,
    windows: &DedupWindows,
    probe: &DuplicateProbe<'_>,
) -> rusqlite::Result<bool> {
    let (from, to) = windows.range(probe.timestamp, probe.stanza_id.is_some());
    let mut stmt = conn.prepare_cached(statements::FIND_DUPLICATE)?;
    stmt.query_row(
        params![
            probe.account.as_str(),
            probe.peer.as_str(),
            from,
            to,
            probe.item_type.as_i64(),
            probe.body,
            probe.stanza_id,
            probe.author.map(BareJid::as_str),
            probe.author_nickname,
        ],
        |row| row.get(0),
    )
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous query helpers run inside tokio-rusqlite closures.
//!
//! Helpers take `&rusqlite::Connection` so they work both on a bare
//! connection and inside a transaction.

pub mod conversations;
pub mod history;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use skylark_core::BareJid;

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn jid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<BareJid> {
    let raw: String = row.get(idx)?;
    BareJid::new(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_jid_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<BareJid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        BareJid::new(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

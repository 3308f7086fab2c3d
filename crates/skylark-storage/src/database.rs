// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! Every mutation goes through the writer connection, whose single background
//! thread is the history dispatcher. Reads use a second connection so they
//! never queue behind writes.

use std::path::Path;

use skylark_core::SkylarkError;
use tracing::{debug, info};

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into `SkylarkError::Storage`.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> SkylarkError {
    SkylarkError::Storage {
        source: Box::new(e),
    }
}

/// Unwrap errors a closure raised as `SkylarkError` itself.
fn flatten_call_err(e: tokio_rusqlite::Error<SkylarkError>) -> SkylarkError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner,
        other => SkylarkError::storage(other),
    }
}

fn apply_pragmas(conn: &rusqlite::Connection, wal_mode: bool) -> rusqlite::Result<()> {
    if wal_mode {
        // journal_mode returns the resulting mode as a row.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        debug!(%mode, "journal mode set");
    }
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Handle to the history database: one writer and one reader connection.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
    path: String,
}

impl Database {
    /// Open (creating if needed) the database at `path`, apply PRAGMAs and
    /// run pending migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, SkylarkError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(SkylarkError::storage)?;
            }
        }

        let writer = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(SkylarkError::storage)?;
        writer
            .call(move |conn| -> Result<(), SkylarkError> {
                apply_pragmas(conn, wal_mode).map_err(SkylarkError::storage)?;
                run_migrations(conn)
            })
            .await
            .map_err(flatten_call_err)?;

        let reader = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(SkylarkError::storage)?;
        reader
            .call(|conn| -> rusqlite::Result<()> {
                conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA query_only = ON;")
            })
            .await
            .map_err(map_tr_err)?;

        info!(path, wal_mode, "history database opened");
        Ok(Self {
            writer,
            reader,
            path: path.to_string(),
        })
    }

    /// The single writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// The read-only connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoint the WAL so the main database file is self-contained.
    pub async fn close(&self) -> Result<(), SkylarkError> {
        self.writer
            .call(|conn| -> rusqlite::Result<()> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(map_tr_err)?;
        debug!(path = %self.path, "WAL checkpoint complete");
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite chat history for the Skylark messaging runtime.
//!
//! WAL-mode SQLite with embedded migrations. All mutations go through the
//! single writer thread of `tokio-rusqlite`, so duplicate detection and insert
//! are atomic with respect to each other. Reads use a separate connection.

pub mod badge;
pub mod database;
pub mod dedup;
pub mod handler;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod statements;
pub mod store;

pub use badge::UnreadBadge;
pub use database::Database;
pub use dedup::DedupWindows;
pub use handler::HistoryEventHandler;
pub use models::{AppendOutcome, NewEntry};
pub use store::ChatHistoryStore;

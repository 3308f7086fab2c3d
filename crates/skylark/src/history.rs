// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `skylark history` command implementation.
//!
//! Opens the configured history database and inspects or edits it offline.

use std::io::Write;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use skylark_core::types::{Direction, MessageEntry};
use skylark_core::{BareJid, SkylarkError};
use skylark_storage::ChatHistoryStore;

/// History subcommands.
#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// Count stored entries of a conversation.
    Count {
        #[arg(long)]
        account: BareJid,
        #[arg(long)]
        peer: BareJid,
    },
    /// Print a page of a conversation, most recent first.
    List {
        #[arg(long)]
        account: BareJid,
        #[arg(long)]
        peer: BareJid,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Output JSON lines instead of text.
        #[arg(long)]
        json: bool,
    },
    /// List conversations with unread entries.
    Unread,
    /// Mark every entry of a conversation read.
    MarkRead {
        #[arg(long)]
        account: BareJid,
        #[arg(long)]
        peer: BareJid,
    },
    /// Delete a conversation, or a whole account's history without `--peer`.
    Purge {
        #[arg(long)]
        account: BareJid,
        #[arg(long)]
        peer: Option<BareJid>,
    },
}

/// One entry as printed by `history list --json`.
#[derive(Debug, Serialize)]
struct EntryRow<'a> {
    id: i64,
    timestamp: DateTime<Utc>,
    direction: Direction,
    state: String,
    author: Option<&'a str>,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> From<&'a MessageEntry> for EntryRow<'a> {
    fn from(entry: &'a MessageEntry) -> Self {
        Self {
            id: entry.id.0,
            timestamp: entry.timestamp,
            direction: entry.state.direction(),
            state: entry.state.to_string(),
            author: entry
                .author_nickname
                .as_deref()
                .or(entry.author.as_ref().map(BareJid::as_str)),
            body: &entry.body,
            error: entry.error.as_deref(),
        }
    }
}

fn io_err(e: std::io::Error) -> SkylarkError {
    SkylarkError::Internal(format!("failed to write output: {e}"))
}

/// Run one history subcommand against `store`, printing to `out`.
pub async fn run_history(
    store: &ChatHistoryStore,
    command: HistoryCommand,
    out: &mut impl Write,
) -> Result<(), SkylarkError> {
    match command {
        HistoryCommand::Count { account, peer } => {
            let count = store.count(&account, &peer).await?;
            writeln!(out, "{count}").map_err(io_err)?;
        }
        HistoryCommand::List {
            account,
            peer,
            limit,
            offset,
            json,
        } => {
            for entry in store.page(&account, &peer, limit, offset).await? {
                let row = EntryRow::from(&entry);
                if json {
                    let line = serde_json::to_string(&row)
                        .map_err(|e| SkylarkError::Internal(format!("failed to encode entry: {e}")))?;
                    writeln!(out, "{line}").map_err(io_err)?;
                } else {
                    let arrow = match row.direction {
                        Direction::Incoming => "<-",
                        Direction::Outgoing => "->",
                    };
                    writeln!(
                        out,
                        "{} {arrow} [{}] {}",
                        row.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        row.state,
                        row.body
                    )
                    .map_err(io_err)?;
                }
            }
        }
        HistoryCommand::Unread => {
            for (account, peer) in store.unread_conversations().await? {
                writeln!(out, "{account}\t{peer}").map_err(io_err)?;
            }
        }
        HistoryCommand::MarkRead { account, peer } => {
            let changed = store.mark_all_read(&account, &peer).await?;
            let message = if changed { "marked read" } else { "nothing unread" };
            writeln!(out, "{message}").map_err(io_err)?;
        }
        HistoryCommand::Purge { account, peer } => {
            let deleted = match peer {
                Some(peer) => store.delete_conversation(&account, &peer).await?,
                None => store.delete_account(&account).await?,
            };
            writeln!(out, "deleted {deleted} entries").map_err(io_err)?;
        }
    }
    Ok(())
}

// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQL used by the history store.
//!
//! Every statement goes through `prepare_cached`. [`warm`] prepares each set
//! once when the store is constructed, so later calls only hit the cache.

pub const INSERT_ENTRY: &str = "INSERT INTO chat_history
    (account, jid, author_jid, author_nickname, timestamp, item_type, data, stanza_id, state, encryption, fingerprint, error)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

pub const FIND_DUPLICATE: &str = "SELECT EXISTS (SELECT 1 FROM chat_history
    WHERE account = ?1 AND jid = ?2 AND timestamp BETWEEN ?3 AND ?4 AND item_type = ?5
      AND (?6 IS NULL OR data = ?6)
      AND (?7 IS NULL OR (stanza_id IS NOT NULL AND stanza_id = ?7))
      AND (?8 IS NULL OR author_jid = ?8)
      AND (?9 IS NULL OR author_nickname = ?9))";

/// Outgoing-direction rows only: 1, 3, 4, 5, 6, 7.
pub const FIND_OUTGOING_BY_STANZA_ID: &str = "SELECT id, state FROM chat_history
    WHERE account = ?1 AND jid = ?2 AND stanza_id = ?3 AND state IN (1, 3, 4, 5, 6, 7)
    ORDER BY id DESC LIMIT 1";

/// Guarded compare-and-set: only matches while the row is still in `?3`.
pub const CHANGE_STATE: &str = "UPDATE chat_history SET state = ?2 WHERE id = ?1 AND state = ?3";

pub const MARK_OUTGOING_ERROR: &str =
    "UPDATE chat_history SET state = ?2, error = ?3 WHERE id = ?1 AND state = ?4";

pub const MARK_ALL_READ: &str = "UPDATE chat_history SET state = CASE state
        WHEN 8 THEN 9
        WHEN 6 THEN 7
        ELSE 0 END
    WHERE account = ?1 AND jid = ?2 AND state IN (2, 6, 8)";

pub const UPDATE_PREVIEW: &str =
    "UPDATE chat_history SET preview = ?2 WHERE id = ?1 RETURNING account, jid";

pub const CLEAR_PREVIEW: &str = "UPDATE chat_history SET preview = NULL WHERE preview = ?1";

pub const DELETE_CONVERSATION: &str = "DELETE FROM chat_history WHERE account = ?1 AND jid = ?2";

pub const DELETE_ACCOUNT_HISTORY: &str = "DELETE FROM chat_history WHERE account = ?1";

pub const DELETE_ACCOUNT_CHATS: &str = "DELETE FROM chats WHERE account = ?1";

/// Monotonic watermark: an older timestamp never replaces a newer one.
pub const ADVANCE_WATERMARK: &str = "INSERT INTO chats (account, jid, timestamp) VALUES (?1, ?2, ?3)
    ON CONFLICT (account, jid) DO UPDATE SET timestamp = excluded.timestamp
    WHERE excluded.timestamp > chats.timestamp";

pub const COUNT_ENTRIES: &str = "SELECT count(id) FROM chat_history WHERE account = ?1 AND jid = ?2";

pub const COUNT_UNREAD_CONVERSATIONS: &str = "SELECT count(1) FROM
    (SELECT account, jid FROM chat_history WHERE state IN (2, 6, 8) GROUP BY account, jid)";

pub const LIST_UNREAD_CONVERSATIONS: &str =
    "SELECT DISTINCT account, jid FROM chat_history WHERE state IN (2, 6, 8) ORDER BY account, jid";

pub const PAGE_ENTRIES: &str = "SELECT id, account, jid, author_jid, author_nickname, timestamp, item_type,
        data, stanza_id, state, encryption, fingerprint, preview, error
    FROM chat_history WHERE account = ?1 AND jid = ?2
    ORDER BY timestamp DESC, id DESC LIMIT ?3 OFFSET ?4";

pub const ENTRY_TIMESTAMP: &str =
    "SELECT timestamp FROM chat_history WHERE id = ?1 AND account = ?2 AND jid = ?3";

pub const COUNT_OLDER: &str = "SELECT count(id) FROM chat_history
    WHERE account = ?1 AND jid = ?2 AND id <> ?3 AND timestamp < ?4";

pub const COUNT_NEWER: &str = "SELECT count(id) FROM chat_history
    WHERE account = ?1 AND jid = ?2 AND id <> ?3 AND timestamp > ?4";

pub const ENTRY_ERROR: &str = "SELECT error FROM chat_history WHERE id = ?1";

pub const LAST_MESSAGE_TIME: &str = "SELECT max(timestamp) FROM chat_history WHERE account = ?1";

pub const LAST_ACTIVITY: &str = "SELECT timestamp FROM chats WHERE account = ?1 AND jid = ?2";

/// Statements executed on the writer connection.
pub const WRITER: &[&str] = &[
    INSERT_ENTRY,
    FIND_DUPLICATE,
    FIND_OUTGOING_BY_STANZA_ID,
    CHANGE_STATE,
    MARK_OUTGOING_ERROR,
    MARK_ALL_READ,
    UPDATE_PREVIEW,
    CLEAR_PREVIEW,
    DELETE_CONVERSATION,
    DELETE_ACCOUNT_HISTORY,
    DELETE_ACCOUNT_CHATS,
    ADVANCE_WATERMARK,
];

/// Statements executed on the reader connection.
pub const READER: &[&str] = &[
    FIND_DUPLICATE,
    COUNT_ENTRIES,
    COUNT_UNREAD_CONVERSATIONS,
    LIST_UNREAD_CONVERSATIONS,
    PAGE_ENTRIES,
    ENTRY_TIMESTAMP,
    COUNT_OLDER,
    COUNT_NEWER,
    ENTRY_ERROR,
    LAST_MESSAGE_TIME,
    LAST_ACTIVITY,
];

/// Prepare every statement in `set` into the connection's statement cache.
pub fn warm(conn: &rusqlite::Connection, set: &[&str]) -> rusqlite::Result<()> {
    conn.set_prepared_statement_cache_capacity(set.len().max(16));
    for sql in set {
        conn.prepare_cached(sql)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_core::types::{Direction, MessageState};

    #[test]
    fn inlined_state_values_match_enum() {
        let mut unread = MessageState::UNREAD.map(MessageState::as_i64);
        unread.sort();
        assert_eq!(unread, [2, 6, 8]);

        for (from, to) in [(8, 9), (6, 7), (2, 0)] {
            let from = MessageState::try_from(from).unwrap();
            let to = MessageState::try_from(to).unwrap();
            assert_eq!(from.read_equivalent(), Some(to));
        }

        let outgoing: Vec<i64> = MessageState::ALL
            .iter()
            .filter(|s| s.direction() == Direction::Outgoing)
            .map(|s| s.as_i64())
            .collect();
        assert_eq!(outgoing, vec![1, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn every_statement_prepares_against_schema() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::migrations::run_migrations(&mut conn).unwrap();
        warm(&conn, WRITER).unwrap();
        warm(&conn, READER).unwrap();
    }
}

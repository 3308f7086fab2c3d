// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unread conversation counter kept current from history notifications.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use skylark_core::SkylarkError;

use crate::store::ChatHistoryStore;

/// Number of conversations with unread entries, published on a watch channel.
///
/// The background task stops when the badge is dropped.
pub struct UnreadBadge {
    rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl UnreadBadge {
    pub async fn spawn(store: Arc<ChatHistoryStore>) -> Result<Self, SkylarkError> {
        // Subscribe first so no change between the initial count and the
        // subscription is missed.
        let mut events = store.subscribe();
        let initial = store.count_unread_conversations().await?;
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "unread badge lagged, recounting");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                match store.count_unread_conversations().await {
                    Ok(count) => {
                        tx.send_if_modified(|current| {
                            let changed = *current != count;
                            *current = count;
                            changed
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to recount unread conversations"),
                }
            }
        });

        Ok(Self { rx, task })
    }

    pub fn current(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }
}

impl Drop for UnreadBadge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::dedup::DedupWindows;
    use crate::models::NewEntry;
    use chrono::Utc;
    use skylark_bus::EventBus;
    use skylark_core::BareJid;
    use skylark_core::types::Direction;
    use std::time::Duration;

    #[tokio::test]
    async fn badge_tracks_unread_conversations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let db = Database::open(path.to_str().unwrap(), true).await.unwrap();
        let store = Arc::new(
            ChatHistoryStore::new(db, DedupWindows::default(), EventBus::new(16))
                .await
                .unwrap(),
        );
        let badge = UnreadBadge::spawn(Arc::clone(&store)).await.unwrap();
        assert_eq!(badge.current(), 0);

        let mut rx = badge.watch();
        let me = BareJid::new("me@example.org").unwrap();
        let bob = BareJid::new("bob@example.org").unwrap();
        store
            .append(NewEntry::new(me.clone(), bob.clone(), Direction::Incoming, "hi", Utc::now()))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n == 1))
            .await
            .unwrap()
            .unwrap();

        store.mark_all_read(&me, &bob).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();
    }
}

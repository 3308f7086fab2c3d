// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast bus carrying typed notifications.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A published notification with delivery metadata.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub event_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub payload: T,
}

/// Fan-out bus for one notification type.
///
/// Publishing never blocks: a subscriber that falls more than `capacity`
/// notifications behind observes `RecvError::Lagged` and resumes from the
/// oldest retained one.
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<Envelope<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification. Returns how many subscribers will see it.
    pub fn publish(&self, payload: T) -> usize {
        let envelope = Envelope {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            payload,
        };
        // No subscribers is a normal state, not a failure.
        self.sender.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<T>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

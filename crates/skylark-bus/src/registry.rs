// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Kind-indexed registry of protocol event handlers.

use std::sync::Arc;

use dashmap::DashMap;
use skylark_core::events::{EventKind, ProtocolEvent};
use skylark_core::traits::{EventHandler, EventRegistry};

/// Routes each [`ProtocolEvent`] to the handlers registered for its kind.
///
/// Handlers are identified by their `Arc` allocation. Registering the same
/// handler twice for a kind has no effect.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|entry| entry.value().is_empty())
    }

    /// Deliver `event` to its handlers in registration order.
    ///
    /// The handler list is snapshotted first, so handlers may register or
    /// unregister while being dispatched to. Returns the number of handlers
    /// invoked.
    pub async fn dispatch(&self, event: &ProtocolEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .get(&kind)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(%kind, account = %event.account(), "no handler registered");
        }
        for handler in &snapshot {
            handler.handle(event).await;
        }
        snapshot.len()
    }
}

impl EventRegistry for HandlerRegistry {
    fn register(&self, handler: Arc<dyn EventHandler>, kinds: &[EventKind]) {
        for kind in kinds {
            let mut entry = self.handlers.entry(*kind).or_default();
            if !entry.iter().any(|h| same_handler(h, &handler)) {
                entry.push(Arc::clone(&handler));
            }
        }
    }

    fn unregister(&self, handler: &Arc<dyn EventHandler>, kinds: &[EventKind]) {
        for kind in kinds {
            if let Some(mut entry) = self.handlers.get_mut(kind) {
                entry.retain(|h| !same_handler(h, handler));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skylark_core::BareJid;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &ProtocolEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn disconnected() -> ProtocolEvent {
        ProtocolEvent::Disconnected {
            account: BareJid::new("me@example.org").unwrap(),
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_only_registered_kinds() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn EventHandler> = counter.clone();
        registry.register(handler, &[EventKind::Disconnected]);

        assert_eq!(registry.dispatch(&disconnected()).await, 1);
        let other = ProtocolEvent::SessionEstablished {
            account: BareJid::new("me@example.org").unwrap(),
        };
        assert_eq!(registry.dispatch(&other).await, 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let registry = HandlerRegistry::new();
        let handler: Arc<dyn EventHandler> = Arc::new(Counter::default());
        registry.register(Arc::clone(&handler), &EventKind::LIFECYCLE);
        registry.register(Arc::clone(&handler), &[EventKind::Disconnected]);
        assert_eq!(registry.handler_count(EventKind::Disconnected), 1);
    }

    #[tokio::test]
    async fn unregister_removes_by_identity() {
        let registry = HandlerRegistry::new();
        let a: Arc<dyn EventHandler> = Arc::new(Counter::default());
        let b: Arc<dyn EventHandler> = Arc::new(Counter::default());
        registry.register(Arc::clone(&a), &EventKind::LIFECYCLE);
        registry.register(Arc::clone(&b), &[EventKind::Disconnected]);

        registry.unregister(&a, &EventKind::LIFECYCLE);
        assert_eq!(registry.handler_count(EventKind::Disconnected), 1);
        assert_eq!(registry.handler_count(EventKind::StreamResumed), 0);

        registry.unregister(&b, &[EventKind::Disconnected]);
        assert!(registry.is_empty());
    }
}

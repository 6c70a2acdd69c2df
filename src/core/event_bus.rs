// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Event bus for fused status distribution

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::debug;

use super::callbacks::Callbacks;
use super::event::StateEvent;

/// Synchronous publish/subscribe dispatcher.
///
/// Subscribers run in subscription order on the publishing task. There is no
/// buffering and no replay: a late subscriber only sees later events.
pub struct EventBus {
    subscribers: Callbacks<StateEvent>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Callbacks::new("EventBus"),
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&StateEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribers.register(callback);
    }

    /// Publish to every subscriber. Returns the number of successful deliveries.
    pub fn publish(&self, event: &StateEvent) -> usize {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let delivered = self.subscribers.emit(event);
        debug!(
            "EventBus #{}: {} delivered to {}/{} subscribers",
            id,
            event.status(),
            delivered,
            self.subscribers.len()
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events published so far
    pub fn published_count(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_delivery_order_and_isolation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        let first = seen.clone();
        bus.subscribe(move |e| {
            first.lock().push(format!("first:{}", e.status()));
            Ok(())
        });
        bus.subscribe(|_| anyhow::bail!("subscriber down"));
        let third = seen.clone();
        bus.subscribe(move |e| {
            third.lock().push(format!("third:{}", e.status()));
            Ok(())
        });

        let delivered = bus.publish(&StateEvent::new(Status::Working, 0.9, "test"));

        assert_eq!(delivered, 2);
        assert_eq!(*seen.lock(), vec!["first:working", "third:working"]);
    }

    #[test]
    fn test_late_subscriber_sees_no_replay() {
        let seen = Arc::new(Mutex::new(0usize));
        let mut bus = EventBus::new();

        bus.publish(&StateEvent::new(Status::Idle, 0.5, "test"));

        let counter = seen.clone();
        bus.subscribe(move |_| {
            *counter.lock() += 1;
            Ok(())
        });
        assert_eq!(*seen.lock(), 0);

        bus.publish(&StateEvent::new(Status::Running, 0.5, "test"));
        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.published_count(), 2);
    }
}

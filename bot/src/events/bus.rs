//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Event bus implementation

use super::types::BotEvent;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

pub type EventHandler = Box<dyn Fn(&BotEvent) + Send + Sync>;

/// Default number of undelivered events kept before the oldest are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Event bus for publishing and subscribing to bot events
///
/// Publishing only queues the event. Handlers run when the owner calls
/// [`EventBus::process_events`], once per scheduler tick, so a slow or
/// panicking handler never runs inside a scheduling decision.
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    event_queue: Arc<RwLock<VecDeque<BotEvent>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new event bus holding at most `capacity` undelivered events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            event_queue: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to events with a handler function
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&BotEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.push(Box::new(handler));
    }

    /// Publish an event to the queue
    pub fn publish(&self, event: BotEvent) {
        let mut queue = self.event_queue.write().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!("Event queue full, dropping {}", dropped.name());
            }
        }
        queue.push_back(event);
    }

    /// Process all queued events
    ///
    /// Returns the number of events delivered. A handler that panics is
    /// logged and skipped; remaining handlers still see the event.
    pub fn process_events(&self) -> usize {
        let mut queue = self.event_queue.write().unwrap_or_else(PoisonError::into_inner);
        let events: Vec<_> = queue.drain(..).collect();
        drop(queue);

        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for event in &events {
            for handler in handlers.iter() {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    tracing::warn!("Event handler panicked while handling {}", event.name());
                }
            }
        }
        events.len()
    }

    /// Clear all queued events without processing
    pub fn clear(&self) {
        let mut queue = self.event_queue.write().unwrap_or_else(PoisonError::into_inner);
        queue.clear();
    }

    /// Get the number of queued events
    pub fn queue_len(&self) -> usize {
        let queue = self.event_queue.read().unwrap_or_else(PoisonError::into_inner);
        queue.len()
    }

    /// Get the number of subscribed handlers
    pub fn handler_count(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            event_queue: Arc::clone(&self.event_queue),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("queued", &self.queue_len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn custom(data: &str) -> BotEvent {
        BotEvent::Custom {
            event_type: "test".into(),
            data: data.into(),
        }
    }

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.subscribe(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(custom("data"));
        assert_eq!(bus.queue_len(), 1);

        assert_eq!(bus.process_events(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        bus.subscribe(|_| panic!("observer blew up"));
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(custom("one"));
        bus.publish(custom("two"));
        assert_eq!(bus.process_events(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // The bus stays usable afterwards
        bus.publish(custom("three"));
        bus.process_events();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        let seen = Arc::new(RwLock::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(move |event| {
            if let BotEvent::Custom { data, .. } = event {
                s.write().unwrap().push(data.clone());
            }
        });

        bus.publish(custom("a"));
        bus.publish(custom("b"));
        bus.publish(custom("c"));
        assert_eq!(bus.queue_len(), 2);

        bus.process_events();
        assert_eq!(*seen.read().unwrap(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.publish(custom("data"));
        assert_eq!(bus.queue_len(), 1);
        bus.clear();
        assert_eq!(bus.queue_len(), 0);
    }
}

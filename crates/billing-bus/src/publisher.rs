//! # Event Publisher
//!
//! Defines the publishing side of the event bus.

use crate::events::{BusEvent, EventFilter};
use crate::subscriber::{EventStream, Subscription, SubscriptionGuard};
use crate::DEFAULT_CHANNEL_CAPACITY;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Trait for publishing events to the bus.
///
/// Publishing is synchronous so producers can emit while holding their own
/// state locks; ordering of emitted events then follows lock order.
pub trait EventPublisher<E: BusEvent>: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// # Returns
    ///
    /// The number of active subscribers that received the event.
    fn publish(&self, event: E) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// In-memory implementation of the event bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer semantics.
pub struct InMemoryEventBus<E: BusEvent> {
    /// Broadcast sender for events.
    sender: broadcast::Sender<E>,

    /// Active subscription count by filter key.
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    /// Total events published.
    events_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl<E: BusEvent> InMemoryEventBus<E> {
    /// Create a new in-memory event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory event bus with specified capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    fn track(&self, filter: &EventFilter<E::Topic>) -> SubscriptionGuard {
        let key = filter.key();
        if let Ok(mut subs) = self.subscriptions.write() {
            *subs.entry(key.clone()).or_insert(0) += 1;
        }
        debug!(topics = ?filter.topics, "New subscription created");
        SubscriptionGuard::new(self.subscriptions.clone(), key)
    }

    /// Subscribe to events matching a filter.
    ///
    /// Only events published after this call are delivered.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter<E::Topic>) -> Subscription<E> {
        let receiver = self.sender.subscribe();
        let guard = self.track(&filter);
        Subscription::new(receiver, filter, guard)
    }

    /// Get a `Stream` of events matching a filter.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter<E::Topic>) -> EventStream<E> {
        let receiver = self.sender.subscribe();
        let guard = self.track(&filter);
        EventStream::new(receiver, filter, guard)
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of live subscriptions registered with exactly this filter.
    #[must_use]
    pub fn subscriptions_for(&self, filter: &EventFilter<E::Topic>) -> usize {
        self.subscriptions
            .read()
            .ok()
            .and_then(|subs| subs.get(&filter.key()).copied())
            .unwrap_or(0)
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: BusEvent> Default for InMemoryEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventPublisher<E> for InMemoryEventBus<E> {
    fn publish(&self, event: E) -> usize {
        let topic = event.topic();

        // Always increment counter (event was attempted)
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receiver_count) => {
                trace!(topic = ?topic, receivers = receiver_count, "Event published");
                receiver_count
            }
            Err(_) => {
                // No receivers: nothing to deliver, current state stays readable
                trace!(topic = ?topic, "Event dropped (no receivers)");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Topic {
        Numbers,
        Words,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum TestEvent {
        Number(u32),
        Word(&'static str),
    }

    impl BusEvent for TestEvent {
        type Topic = Topic;

        fn topic(&self) -> Topic {
            match self {
                TestEvent::Number(_) => Topic::Numbers,
                TestEvent::Word(_) => Topic::Words,
            }
        }
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = InMemoryEventBus::<TestEvent>::new();
        let receivers = bus.publish(TestEvent::Number(1));
        assert_eq!(receivers, 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[test]
    fn test_publish_with_subscriber() {
        let bus = InMemoryEventBus::<TestEvent>::new();
        let _sub = bus.subscribe(EventFilter::all());

        let receivers = bus.publish(TestEvent::Number(1));

        assert_eq!(receivers, 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = InMemoryEventBus::<TestEvent>::new();

        let _sub1 = bus.subscribe(EventFilter::all());
        let _sub2 = bus.subscribe(EventFilter::all());
        let _sub3 = bus.subscribe(EventFilter::topic(Topic::Words));

        // Topic filtering happens on the receiving side
        let receivers = bus.publish(TestEvent::Number(7));

        assert_eq!(receivers, 3);
        assert_eq!(bus.subscriptions_for(&EventFilter::all()), 2);
        assert_eq!(bus.subscriptions_for(&EventFilter::topic(Topic::Words)), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let bus = InMemoryEventBus::<TestEvent>::with_capacity(0);
        assert_eq!(bus.capacity(), 1);
    }

    #[test]
    fn test_default_bus() {
        let bus = InMemoryEventBus::<TestEvent>::default();
        assert_eq!(bus.capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.events_published(), 0);
    }

    #[test]
    fn test_word_events_count_too() {
        let bus = InMemoryEventBus::<TestEvent>::new();
        bus.publish(TestEvent::Word("a"));
        bus.publish(TestEvent::Number(2));
        assert_eq!(bus.events_published(), 2);
    }
}

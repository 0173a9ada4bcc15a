//! # Bus Events
//!
//! The bus is generic over the event type. Anything published must be
//! cheaply cloneable (each subscriber gets its own copy) and expose a topic
//! used for subscription filtering.

use std::fmt::Debug;

/// An event that can travel over the bus.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Topic discriminant used by [`EventFilter`].
    type Topic: Copy + Eq + Debug + Send + Sync + 'static;

    /// Topic this event belongs to.
    fn topic(&self) -> Self::Topic;
}

/// Topic filter for subscriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter<T> {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<T>,
}

impl<T> Default for EventFilter<T> {
    fn default() -> Self {
        Self { topics: Vec::new() }
    }
}

impl<T: Copy + Eq + Debug> EventFilter<T> {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<T>) -> Self {
        Self { topics }
    }

    /// Create a filter for a single topic.
    #[must_use]
    pub fn topic(topic: T) -> Self {
        Self {
            topics: vec![topic],
        }
    }

    /// Check if a topic passes this filter.
    #[must_use]
    pub fn matches(&self, topic: &T) -> bool {
        self.topics.is_empty() || self.topics.contains(topic)
    }

    /// Stable key used for per-topic subscription bookkeeping.
    pub(crate) fn key(&self) -> String {
        format!("{:?}", self.topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Topic {
        Alpha,
        Beta,
    }

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::<Topic>::all();
        assert!(filter.matches(&Topic::Alpha));
        assert!(filter.matches(&Topic::Beta));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topic(Topic::Alpha);
        assert!(filter.matches(&Topic::Alpha));
        assert!(!filter.matches(&Topic::Beta));
    }

    #[test]
    fn test_filter_key_distinguishes_topics() {
        let a = EventFilter::topic(Topic::Alpha);
        let b = EventFilter::topics(vec![Topic::Alpha, Topic::Beta]);
        assert_ne!(a.key(), b.key());
    }
}

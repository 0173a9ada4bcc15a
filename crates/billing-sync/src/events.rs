//! # Billing Events
//!
//! Events fanned out over the bus, typed streams over them, and the
//! announcer for freshly acknowledged purchases.
//!
//! | Source | Payload | Consumer view | Delivery |
//! |--------|---------|---------------|----------|
//! | bus `StateChanges` | `(ProductId, SkuState)` | [`StateChangeStream`] | drop-oldest |
//! | bus `Connection` | `ConnectionState` | [`ConnectionStream`] | drop-oldest |
//! | [`PurchaseAnnouncer`] | `Vec<ProductId>` | [`NewPurchaseStream`] | lossless |

use crate::domain::{ConnectionState, ProductId, SkuState};
use billing_bus::{BusEvent, EventFilter, EventPublisher, EventStream, InMemoryEventBus};
use billing_telemetry::EVENTS_PUBLISHED;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// Event published by the billing engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BillingEvent {
    /// A product's purchase state changed.
    SkuStateChanged {
        /// Product that changed.
        product_id: ProductId,
        /// New state.
        state: SkuState,
    },
    /// The connection state changed.
    ConnectionStateChanged(ConnectionState),
}

/// Topics of [`BillingEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BillingTopic {
    /// Purchase-state changes.
    StateChanges,
    /// Connection lifecycle.
    Connection,
}

impl BusEvent for BillingEvent {
    type Topic = BillingTopic;

    fn topic(&self) -> BillingTopic {
        match self {
            BillingEvent::SkuStateChanged { .. } => BillingTopic::StateChanges,
            BillingEvent::ConnectionStateChanged(_) => BillingTopic::Connection,
        }
    }
}

/// The engine's event bus.
pub type BillingEventBus = InMemoryEventBus<BillingEvent>;

/// Publish and count the event. Never blocks.
pub(crate) fn publish(bus: &BillingEventBus, event: BillingEvent) -> usize {
    EVENTS_PUBLISHED.inc();
    bus.publish(event)
}

/// A stream of one topic's payloads.
///
/// Lagging consumers lose the oldest items; [`TopicStream::lagged_events`]
/// reports how many.
pub struct TopicStream<T> {
    inner: EventStream<BillingEvent>,
    extract: fn(BillingEvent) -> Option<T>,
}

impl<T> TopicStream<T> {
    fn new(
        bus: &BillingEventBus,
        topic: BillingTopic,
        extract: fn(BillingEvent) -> Option<T>,
    ) -> Self {
        Self {
            inner: bus.event_stream(EventFilter::topic(topic)),
            extract,
        }
    }

    /// Next item, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.next().await
    }

    /// Items lost because this consumer fell behind.
    pub fn lagged_events(&self) -> u64 {
        self.inner.lagged_events()
    }
}

impl<T> Stream for TopicStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(item) = (this.extract)(event) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream of `(product_id, state)` changes.
pub type StateChangeStream = TopicStream<(ProductId, SkuState)>;

/// Stream of connection-state changes.
pub type ConnectionStream = TopicStream<ConnectionState>;

/// Subscribe to state changes.
pub fn state_changes(bus: &BillingEventBus) -> StateChangeStream {
    TopicStream::new(bus, BillingTopic::StateChanges, |event| match event {
        BillingEvent::SkuStateChanged { product_id, state } => Some((product_id, state)),
        _ => None,
    })
}

/// Subscribe to connection-state changes.
pub fn connection_changes(bus: &BillingEventBus) -> ConnectionStream {
    TopicStream::new(bus, BillingTopic::Connection, |event| match event {
        BillingEvent::ConnectionStateChanged(state) => Some(state),
        _ => None,
    })
}

/// Lossless fan-out of freshly acknowledged purchases.
///
/// Every subscriber owns an unbounded queue, so state-change traffic on the
/// bus can never push an announcement out of it. Subscribers whose stream
/// was dropped are pruned on the next announcement.
#[derive(Default)]
pub struct PurchaseAnnouncer {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Vec<ProductId>>>>,
}

impl PurchaseAnnouncer {
    /// Create an announcer with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every purchase announced from now on.
    pub fn subscribe(&self) -> NewPurchaseStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        NewPurchaseStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Deliver `products` to every live subscriber. Never blocks.
    ///
    /// Returns the number of subscribers reached.
    pub fn announce(&self, products: &[ProductId]) -> usize {
        EVENTS_PUBLISHED.inc();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(products.to_vec()).is_ok());
        subscribers.len()
    }

    /// Number of live subscribers as of the last announcement.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Stream of product lists for freshly acknowledged purchases.
pub struct NewPurchaseStream {
    inner: UnboundedReceiverStream<Vec<ProductId>>,
}

impl NewPurchaseStream {
    /// Next announcement, or `None` once the announcer is gone.
    pub async fn recv(&mut self) -> Option<Vec<ProductId>> {
        self.inner.next().await
    }
}

impl Stream for NewPurchaseStream {
    type Item = Vec<ProductId>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streams_split_by_topic() {
        let bus = BillingEventBus::new();
        let mut states = state_changes(&bus);
        let mut connection = connection_changes(&bus);

        publish(
            &bus,
            BillingEvent::ConnectionStateChanged(ConnectionState::Connected),
        );
        publish(
            &bus,
            BillingEvent::SkuStateChanged {
                product_id: ProductId::new("p1"),
                state: SkuState::Purchased,
            },
        );

        assert_eq!(
            states.recv().await,
            Some((ProductId::new("p1"), SkuState::Purchased))
        );
        assert_eq!(connection.recv().await, Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = BillingEventBus::new();
        let mut connection = connection_changes(&bus);
        publish(
            &bus,
            BillingEvent::ConnectionStateChanged(ConnectionState::Connecting),
        );
        drop(bus);

        assert_eq!(connection.recv().await, Some(ConnectionState::Connecting));
        assert_eq!(connection.recv().await, None);
    }

    #[tokio::test]
    async fn test_slow_consumer_loses_oldest() {
        let bus = BillingEventBus::with_capacity(2);
        let mut states = state_changes(&bus);

        for state in [
            SkuState::Pending,
            SkuState::Purchased,
            SkuState::PurchasedAcknowledged,
        ] {
            publish(
                &bus,
                BillingEvent::SkuStateChanged {
                    product_id: ProductId::new("p1"),
                    state,
                },
            );
        }

        assert_eq!(
            states.recv().await,
            Some((ProductId::new("p1"), SkuState::Purchased))
        );
        assert_eq!(states.lagged_events(), 1);
    }

    #[tokio::test]
    async fn test_announcements_survive_state_traffic() {
        let bus = BillingEventBus::with_capacity(1);
        let announcer = PurchaseAnnouncer::new();
        let mut purchases = announcer.subscribe();
        let mut states = state_changes(&bus);

        announcer.announce(&[ProductId::new("p1")]);
        for state in [SkuState::Pending, SkuState::Purchased, SkuState::Unpurchased] {
            publish(
                &bus,
                BillingEvent::SkuStateChanged {
                    product_id: ProductId::new("p2"),
                    state,
                },
            );
        }
        announcer.announce(&[ProductId::new("p2")]);

        assert_eq!(purchases.recv().await, Some(vec![ProductId::new("p1")]));
        assert_eq!(purchases.recv().await, Some(vec![ProductId::new("p2")]));
        assert_eq!(
            states.recv().await,
            Some((ProductId::new("p2"), SkuState::Unpurchased))
        );
        assert_eq!(states.lagged_events(), 2);
    }

    #[tokio::test]
    async fn test_dropped_purchase_subscriber_is_pruned() {
        let announcer = PurchaseAnnouncer::new();
        let _kept = announcer.subscribe();
        drop(announcer.subscribe());

        assert_eq!(announcer.announce(&[ProductId::new("p1")]), 1);
        assert_eq!(announcer.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_purchase_stream_ends_with_announcer() {
        let announcer = PurchaseAnnouncer::new();
        let mut purchases = announcer.subscribe();
        announcer.announce(&[ProductId::new("p1")]);
        drop(announcer);

        assert_eq!(purchases.recv().await, Some(vec![ProductId::new("p1")]));
        assert_eq!(purchases.recv().await, None);
    }
}

//! # Event Subscriber
//!
//! Defines the subscription side of the event bus.

use crate::events::{BusEvent, EventFilter};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed.
    #[error("Event bus closed")]
    Closed,
}

/// Decrements the per-filter subscription count when a subscription goes away.
pub(crate) struct SubscriptionGuard {
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,
    key: String,
}

impl SubscriptionGuard {
    pub(crate) fn new(subscriptions: Arc<RwLock<HashMap<String, usize>>>, key: String) -> Self {
        Self { subscriptions, key }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Ok(mut subs) = self.subscriptions.write() else {
            return;
        };
        let Some(count) = subs.get_mut(&self.key) else {
            debug!(topics = %self.key, "Subscription dropped");
            return;
        };

        *count = count.saturating_sub(1);
        if *count == 0 {
            subs.remove(&self.key);
        }
        debug!(topics = %self.key, "Subscription dropped");
    }
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct Subscription<E: BusEvent> {
    receiver: broadcast::Receiver<E>,
    filter: EventFilter<E::Topic>,
    lagged: u64,
    _guard: SubscriptionGuard,
}

impl<E: BusEvent> Subscription<E> {
    pub(crate) fn new(
        receiver: broadcast::Receiver<E>,
        filter: EventFilter<E::Topic>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            receiver,
            filter,
            lagged: 0,
            _guard: guard,
        }
    }

    /// Receive the next event that matches the filter.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next matching event
    /// - `None` - The channel was closed (bus dropped)
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.lagged += count;
                    warn!(lagged = count, "Subscriber lagged, oldest events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event.topic()) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next event without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was available and matched
    /// - `Ok(None)` - No event available
    /// - `Err(SubscriptionError::Closed)` - The channel was closed
    pub fn try_recv(&mut self) -> Result<Option<E>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.lagged += count;
                    continue;
                }
            };

            if self.filter.matches(&event.topic()) {
                return Ok(Some(event));
            }
        }
    }

    /// Total number of events this subscription lost to lag.
    #[must_use]
    pub fn lagged_events(&self) -> u64 {
        self.lagged
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter<E::Topic> {
        &self.filter
    }
}

/// A `Stream` over filtered bus events.
pub struct EventStream<E: BusEvent> {
    inner: BroadcastStream<E>,
    filter: EventFilter<E::Topic>,
    lagged: u64,
    _guard: SubscriptionGuard,
}

impl<E: BusEvent> EventStream<E> {
    pub(crate) fn new(
        receiver: broadcast::Receiver<E>,
        filter: EventFilter<E::Topic>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            filter,
            lagged: 0,
            _guard: guard,
        }
    }

    /// Total number of events this stream lost to lag.
    #[must_use]
    pub fn lagged_events(&self) -> u64 {
        self.lagged
    }

    /// Get the filter for this stream.
    #[must_use]
    pub fn filter(&self) -> &EventFilter<E::Topic> {
        &self.filter
    }
}

// The stream never pins its fields in place; `BroadcastStream` boxes its
// pending future itself.
impl<E: BusEvent> Unpin for EventStream<E> {}

impl<E: BusEvent> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if this.filter.matches(&event.topic()) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    this.lagged += count;
                    warn!(lagged = count, "Stream lagged, oldest events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

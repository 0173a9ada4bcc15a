//! # Billing Bus - Multicast Event Delivery
//!
//! Typed publish/subscribe bus used by the billing engine to fan out
//! purchase-state changes and newly acknowledged purchases to any number of
//! in-process consumers.
//!
//! ## Delivery Rules
//!
//! - Every subscriber receives every event published after it subscribed.
//! - Delivery order matches publish order.
//! - Publishing never blocks. Each subscriber owns a bounded slot in a
//!   `tokio::sync::broadcast` ring; a subscriber that falls behind loses the
//!   **oldest** events and observes the gap as a lag count.
//!
//! ```text
//! ┌──────────────┐   publish()   ┌──────────────┐   subscribe()   ┌────────────┐
//! │   Producer   │ ────────────▶ │ InMemoryBus  │ ──────────────▶ │ Subscriber │
//! └──────────────┘               └──────────────┘                 └────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{BusEvent, EventFilter};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Default number of events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

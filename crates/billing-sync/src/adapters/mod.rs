//! # Adapters Module
//!
//! Implementations of the outbound ports.

pub mod clock;
pub mod in_memory;

pub use clock::{ManualClock, SystemClock};
pub use in_memory::InMemoryBillingBackend;

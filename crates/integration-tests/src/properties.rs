//! # Property Tests
//!
//! Random purchase reports pushed through a connected engine:
//! - every catalog product always has exactly one state
//! - a report applied twice changes nothing the second time
//! - within one purchase token, `PurchasedAcknowledged` never falls back to
//!   `Purchased` or `Pending`

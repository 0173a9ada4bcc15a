//! # Integration Tests Crate
//!
//! End-to-end tests driving `BillingService` against the in-memory backend.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! ├── src/
//! │   ├── lib.rs          # This file
//! │   ├── harness.rs      # Service + backend fixture
//! │   ├── scenarios.rs    # Catalog, purchase, refund and reconnect flows
//! │   ├── concurrency.rs  # Exactly-once acknowledgment, stale results, lag
//! │   └── properties.rs   # Property tests over random purchase reports
//! ```
//!
//! All timing tests run on a paused tokio clock, so backoff delays are
//! observed exactly and take no wall time.

pub mod concurrency;
pub mod harness;
pub mod properties;
pub mod scenarios;

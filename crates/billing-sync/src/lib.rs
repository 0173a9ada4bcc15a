//! # Billing Sync
//!
//! In-app purchase reconciliation engine.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Keep a local, observable view of which products the user owns, in sync
//! with a remote billing service that may disconnect at any time:
//! - Reconnect with exponential backoff (1s doubling to 15 minutes)
//! - Cache catalog details with a 4-hour staleness window
//! - Reconcile purchase reports into a per-product state machine
//! - Acknowledge completed purchases exactly once
//!
//! ## Purchase States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Unpurchased` | Not owned, or the purchase was refunded |
//! | `Pending` | Payment started, not yet completed |
//! | `Purchased` | Completed, acknowledgment outstanding |
//! | `PurchasedAcknowledged` | Completed and acknowledged |
//!
//! ## Module Structure
//!
//! ```text
//! billing-sync/
//! ├── domain/          # Value objects, state table, errors, invariants
//! ├── algorithms/      # Backoff policy, reconciliation planning
//! ├── ports/           # API trait (inbound) + backend and clock (outbound)
//! ├── adapters/        # In-memory backend, system and manual clocks
//! ├── application/     # Controller, cache, store, pipeline, BillingService
//! ├── events.rs        # Bus events and typed streams
//! └── config.rs        # BillingConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod events;
pub mod ports;

// Re-exports
pub use adapters::{InMemoryBillingBackend, ManualClock, SystemClock};
pub use algorithms::{
    delay_after_failures, map_record_state, plan_reconciliation, PendingAcknowledgment,
    ReconciliationPlan, ReconnectBackoff,
};
pub use application::{
    AckOutcome, AcknowledgmentPipeline, BackoffScheduler, BillingService, CatalogCache,
    ConnectionController, ConnectionTracker, PurchaseStateStore, Reconciler,
};
pub use config::{BillingConfig, ConfigError};
pub use domain::{
    invariant_forward_transition, invariant_monotonic_freshness, invariant_table_complete,
    BackendError, BillingError, BillingResponseCode, CatalogEntry, ConnectionState,
    ProductCatalog, ProductId, PurchaseContext, PurchaseRecord, PurchaseState, PurchaseToken,
    ReconciliationSummary, ReconciliationTrigger, SkuDetails, SkuState, SkuStateTable,
    StateChange, Timestamp, CATALOG_STALENESS, RECONNECT_CEILING, RECONNECT_FLOOR,
};
pub use events::{
    BillingEvent, BillingEventBus, BillingTopic, ConnectionStream, NewPurchaseStream,
    PurchaseAnnouncer, StateChangeStream, TopicStream,
};
pub use ports::{BackendEvent, BillingApi, BillingBackend, Clock};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

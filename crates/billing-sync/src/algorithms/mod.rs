//! # Algorithms Module
//!
//! Pure policies: reconnect backoff and reconciliation planning.

pub mod backoff;
pub mod reconciliation;

pub use backoff::{delay_after_failures, ReconnectBackoff};
pub use reconciliation::{
    map_record_state, plan_reconciliation, PendingAcknowledgment, ReconciliationPlan,
};

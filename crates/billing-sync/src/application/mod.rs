//! # Application Module
//!
//! Application services orchestrating the domain and outbound ports.

pub mod ack_pipeline;
pub mod backoff_scheduler;
pub mod catalog_cache;
pub mod connection;
pub mod controller;
pub mod reconciler;
pub mod service;
pub mod state_store;

pub use ack_pipeline::{AckOutcome, AcknowledgmentPipeline};
pub use backoff_scheduler::BackoffScheduler;
pub use catalog_cache::CatalogCache;
pub use connection::ConnectionTracker;
pub use controller::ConnectionController;
pub use reconciler::Reconciler;
pub use service::BillingService;
pub use state_store::{PurchaseStateStore, StoreTransaction};

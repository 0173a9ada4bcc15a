//! # Billing Runtime
//!
//! Sandbox host for the billing engine.
//!
//! - `sandbox` - TOML seed for the in-memory billing service
//! - `runtime` - `BillingRuntime` owning the service and its watchers

pub mod runtime;
pub mod sandbox;

pub use runtime::BillingRuntime;
pub use sandbox::{RuntimeConfig, SandboxConfig, SandboxProduct, SandboxPurchase};

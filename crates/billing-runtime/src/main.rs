//! # Billing Runtime
//!
//! Runs the billing engine against the in-memory sandbox until Ctrl+C.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `BILLING_CONFIG` | Path to a runtime TOML file (built-in sandbox if unset) |
//! | `BILLING_DEMO_PURCHASE` | Product id to buy once connected |
//!
//! Logging is configured through `billing-telemetry` (`BILLING_LOG_LEVEL`,
//! `BILLING_JSON_LOGS`, ...).

use anyhow::{Context, Result};
use billing_runtime::{BillingRuntime, RuntimeConfig};
use billing_sync::ProductId;
use billing_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use tracing::{info, warn};

/// Load configuration from the environment.
fn load_config() -> Result<RuntimeConfig> {
    match std::env::var("BILLING_CONFIG") {
        Ok(path) => {
            info!("Loading runtime config from {}", path);
            RuntimeConfig::load(&path)
        }
        Err(_) => {
            info!("BILLING_CONFIG not set, using the built-in sandbox");
            Ok(RuntimeConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    let config = load_config()?;
    let mut runtime = BillingRuntime::new(config)?;
    runtime.start().await?;

    if let Ok(product) = std::env::var("BILLING_DEMO_PURCHASE") {
        let product_id = ProductId::new(product);
        if let Err(e) = runtime.simulate_purchase(&product_id, "demo-purchase").await {
            warn!("Demo purchase of {} failed: {}", product_id, e);
        }
    }

    info!("Billing runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;

    println!("{}", runtime.snapshot_json()?);
    match encode_metrics() {
        Ok(metrics) => println!("{metrics}"),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    Ok(())
}

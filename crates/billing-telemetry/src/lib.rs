//! # Billing Telemetry
//!
//! Logging and metrics for the billing engine.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters and gauges in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BILLING_SERVICE_NAME` | `billing-engine` | Service name in logs |
//! | `BILLING_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `BILLING_JSON_LOGS` | `false` | JSON log lines |
//! | `BILLING_LOG_SOURCE` | `false` | Include file and line |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, ACKNOWLEDGMENTS, CATALOG_REFRESHES,
    CONNECTION_STATE, CONNECT_ATTEMPTS, EVENTS_PUBLISHED, RECONCILIATION_PASSES,
    RECONNECT_DELAY_SECONDS, SKU_TRANSITIONS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global subscriber could not be installed.
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    /// Metric registration or encoding failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Invalid log filter or other configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(EVENTS_PUBLISHED);
        metric_inc!(CATALOG_REFRESHES, &["ok"]);
        assert!(EVENTS_PUBLISHED.get() >= 1.0);
    }

    #[test]
    fn test_error_messages() {
        let err = TelemetryError::LoggerInit("already set".to_string());
        assert!(err.to_string().contains("already set"));
    }
}

//! Structured logging setup.
//!
//! Console output is human readable during development and JSON in
//! containers, so log shippers can parse fields such as `product_id`,
//! `token` and `attempt` without regexes.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Initialize the global tracing subscriber.
///
/// Fails with [`TelemetryError::LoggerInit`] if a global subscriber is
/// already installed or the filter directive is invalid.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(&config.log_level)?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggerInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggerInit(e.to_string()))?;
    }

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

/// Build an `EnvFilter`, preferring `RUST_LOG` when it is set.
pub(crate) fn build_filter(fallback: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| TelemetryError::Config(e.to_string()))
}

/// Log a purchase-related event with standard fields.
#[macro_export]
macro_rules! log_purchase_event {
    ($level:ident, $msg:expr, $token:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = "billing",
            token = %$token,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a product-related event with standard fields.
#[macro_export]
macro_rules! log_product_event {
    ($level:ident, $msg:expr, $product_id:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = "billing",
            product_id = %$product_id,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("billing_sync=debug,warn").is_ok());
    }
}

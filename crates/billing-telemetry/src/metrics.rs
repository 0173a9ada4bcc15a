//! Prometheus metrics for the billing engine.
//!
//! All metrics follow the naming convention: `billing_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Connection attempts by outcome (connected/failed/discarded)
    pub static ref CONNECT_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("billing_connect_attempts_total", "Billing service connection attempts"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Delay that will be used for the next reconnect
    pub static ref RECONNECT_DELAY_SECONDS: Gauge = Gauge::new(
        "billing_reconnect_delay_seconds",
        "Current reconnect backoff delay"
    ).expect("metric creation failed");

    /// 0 = disconnected, 1 = connecting, 2 = connected
    pub static ref CONNECTION_STATE: IntGauge = IntGauge::new(
        "billing_connection_state",
        "Billing connection state (0 disconnected, 1 connecting, 2 connected)"
    ).expect("metric creation failed");

    // =========================================================================
    // CATALOG
    // =========================================================================

    /// Catalog refreshes by outcome (ok/failed/discarded)
    pub static ref CATALOG_REFRESHES: CounterVec = CounterVec::new(
        Opts::new("billing_catalog_refreshes_total", "Catalog detail queries"),
        &["outcome"]
    ).expect("metric creation failed");

    // =========================================================================
    // PURCHASES
    // =========================================================================

    /// Reconciliation passes by trigger (connect/update/manual)
    pub static ref RECONCILIATION_PASSES: CounterVec = CounterVec::new(
        Opts::new("billing_reconciliation_passes_total", "Purchase reconciliation passes"),
        &["trigger"]
    ).expect("metric creation failed");

    /// Acknowledgments by outcome (acknowledged/failed/duplicate/discarded)
    pub static ref ACKNOWLEDGMENTS: CounterVec = CounterVec::new(
        Opts::new("billing_acknowledgments_total", "Purchase acknowledgment attempts"),
        &["outcome"]
    ).expect("metric creation failed");

    /// SKU state transitions by target state
    pub static ref SKU_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("billing_sku_transitions_total", "SKU state transitions applied"),
        &["state"]
    ).expect("metric creation failed");

    /// Events published to subscribers
    pub static ref EVENTS_PUBLISHED: Counter = Counter::new(
        "billing_events_published_total",
        "Events published on the billing bus"
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CONNECT_ATTEMPTS.clone()),
        Box::new(RECONNECT_DELAY_SECONDS.clone()),
        Box::new(CONNECTION_STATE.clone()),
        Box::new(CATALOG_REFRESHES.clone()),
        Box::new(RECONCILIATION_PASSES.clone()),
        Box::new(ACKNOWLEDGMENTS.clone()),
        Box::new(SKU_TRANSITIONS.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // May fail if another test registered first, which is fine
        let _ = register_metrics();
        let encoded = encode_metrics().unwrap();
        let _ = encoded;
    }

    #[test]
    fn test_counter_vec_increment() {
        ACKNOWLEDGMENTS.with_label_values(&["acknowledged"]).inc();
        assert!(ACKNOWLEDGMENTS.with_label_values(&["acknowledged"]).get() >= 1.0);
    }

    #[test]
    fn test_gauge_set() {
        RECONNECT_DELAY_SECONDS.set(2.0);
        assert!(RECONNECT_DELAY_SECONDS.get() >= 0.0);
    }
}

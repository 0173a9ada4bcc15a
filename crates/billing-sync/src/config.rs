//! # Billing Configuration
//!
//! Configuration for the billing engine, loadable from TOML.
//!
//! ```toml
//! [billing]
//! product_ids = ["vpn_credits_10", "vpn_credits_50"]
//! reconnect_floor_ms = 1000
//! reconnect_ceiling_ms = 900000
//! catalog_staleness_secs = 14400
//! event_buffer_capacity = 64
//! auto_acknowledge = true
//! ```

use crate::domain::{ProductCatalog, CATALOG_STALENESS, RECONNECT_CEILING, RECONNECT_FLOOR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {error}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        error: String,
    },

    /// The file is not valid TOML or has the wrong shape.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Billing engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// The static product catalog.
    pub product_ids: Vec<String>,

    /// First reconnect delay in milliseconds.
    pub reconnect_floor_ms: u64,

    /// Maximum reconnect delay in milliseconds.
    pub reconnect_ceiling_ms: u64,

    /// Catalog details older than this are re-fetched on interest.
    pub catalog_staleness_secs: u64,

    /// Events buffered per subscriber before the oldest are dropped.
    pub event_buffer_capacity: usize,

    /// Acknowledge completed purchases automatically.
    pub auto_acknowledge: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            product_ids: Vec::new(),
            reconnect_floor_ms: duration_ms(RECONNECT_FLOOR),
            reconnect_ceiling_ms: duration_ms(RECONNECT_CEILING),
            catalog_staleness_secs: CATALOG_STALENESS.as_secs(),
            event_buffer_capacity: billing_bus::DEFAULT_CHANNEL_CAPACITY,
            auto_acknowledge: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    billing: BillingConfig,
}

impl BillingConfig {
    /// Create a config for testing: two products, default timings.
    pub fn for_testing() -> Self {
        Self {
            product_ids: vec!["p1".to_string(), "p2".to_string()],
            ..Self::default()
        }
    }

    /// Replace the product list.
    #[must_use]
    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_ids = products.into_iter().map(Into::into).collect();
        self
    }

    /// Load the `[billing]` table from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse the `[billing]` table from a TOML string. Missing keys take
    /// their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.billing.validate()?;
        Ok(file.billing)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.product_ids.is_empty() {
            return Err(ConfigError::Invalid("product_ids is empty".to_string()));
        }
        if let Some(blank) = self.product_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "product_ids[{blank}] is blank"
            )));
        }
        if self.reconnect_floor_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_floor_ms must be positive".to_string(),
            ));
        }
        if self.reconnect_ceiling_ms < self.reconnect_floor_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect_ceiling_ms ({}) is below reconnect_floor_ms ({})",
                self.reconnect_ceiling_ms, self.reconnect_floor_ms
            )));
        }
        if self.catalog_staleness_secs == 0 {
            return Err(ConfigError::Invalid(
                "catalog_staleness_secs must be positive".to_string(),
            ));
        }
        if self.event_buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The static product catalog.
    pub fn catalog(&self) -> ProductCatalog {
        ProductCatalog::new(self.product_ids.iter().cloned())
    }

    /// Reconnect floor as a duration.
    pub fn reconnect_floor(&self) -> Duration {
        Duration::from_millis(self.reconnect_floor_ms)
    }

    /// Reconnect ceiling as a duration.
    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_ceiling_ms)
    }

    /// Catalog staleness window as a duration.
    pub fn catalog_staleness(&self) -> Duration {
        Duration::from_secs(self.catalog_staleness_secs)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

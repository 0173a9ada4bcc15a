//! # Sandbox Configuration
//!
//! What the in-memory billing service should look like at startup.
//!
//! ```toml
//! [billing]
//! product_ids = ["coins_100", "premium"]
//!
//! [sandbox]
//! connect_failures = 2
//!
//! [[sandbox.products]]
//! id = "coins_100"
//! title = "100 Coins"
//! price = "$0.99"
//!
//! [[sandbox.purchases]]
//! token = "tok-1"
//! products = ["premium"]
//! state = "purchased"
//! ```

use anyhow::{Context, Result};
use billing_sync::{
    BackendError, BillingConfig, InMemoryBillingBackend, ProductId, PurchaseRecord,
    PurchaseState, SkuDetails,
};
use serde::Deserialize;
use std::path::Path;

/// Runtime configuration: engine settings plus the sandbox seed.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Engine settings.
    #[serde(default)]
    pub billing: BillingConfig,
    /// Sandbox seed.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Seed data for the in-memory backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Products in the remote catalog.
    pub products: Vec<SandboxProduct>,
    /// Purchases the service reports at startup.
    pub purchases: Vec<SandboxPurchase>,
    /// Connect attempts that fail before one succeeds.
    pub connect_failures: u32,
}

/// One remote catalog product.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxProduct {
    /// Product id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Display description.
    #[serde(default)]
    pub description: String,
    /// Formatted price.
    pub price: String,
}

/// One remote purchase.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxPurchase {
    /// Purchase token.
    pub token: String,
    /// Products covered.
    pub products: Vec<String>,
    /// Purchase state.
    #[serde(default)]
    pub state: SandboxPurchaseState,
    /// Already acknowledged?
    #[serde(default)]
    pub acknowledged: bool,
}

/// Purchase state as written in the sandbox file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPurchaseState {
    /// Payment completed.
    #[default]
    Purchased,
    /// Payment pending.
    Pending,
}

impl From<SandboxPurchaseState> for PurchaseState {
    fn from(state: SandboxPurchaseState) -> Self {
        match state {
            SandboxPurchaseState::Purchased => PurchaseState::Purchased,
            SandboxPurchaseState::Pending => PurchaseState::Pending,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let sandbox = SandboxConfig {
            products: vec![
                SandboxProduct {
                    id: "coins_100".to_string(),
                    title: "100 Coins".to_string(),
                    description: "A small bag of coins".to_string(),
                    price: "$0.99".to_string(),
                },
                SandboxProduct {
                    id: "premium".to_string(),
                    title: "Premium".to_string(),
                    description: "Removes ads forever".to_string(),
                    price: "$4.99".to_string(),
                },
            ],
            purchases: vec![SandboxPurchase {
                token: "sandbox-premium".to_string(),
                products: vec!["premium".to_string()],
                state: SandboxPurchaseState::Purchased,
                acknowledged: false,
            }],
            connect_failures: 1,
        };
        Self {
            billing: BillingConfig::default()
                .with_products(sandbox.products.iter().map(|p| p.id.clone())),
            sandbox,
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid runtime config in {}", path.display()))
    }

    /// Parse from a TOML string. An empty product list in `[billing]` is
    /// filled from the sandbox catalog.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: RuntimeConfig = toml::from_str(content)?;
        if config.billing.product_ids.is_empty() {
            config.billing.product_ids =
                config.sandbox.products.iter().map(|p| p.id.clone()).collect();
        }
        config.billing.validate()?;
        Ok(config)
    }

    /// Build the in-memory backend described by `[sandbox]`.
    pub fn build_backend(&self) -> InMemoryBillingBackend {
        let backend = InMemoryBillingBackend::new();
        for product in &self.sandbox.products {
            backend.add_product(SkuDetails::new(
                product.id.as_str(),
                product.title.clone(),
                product.description.clone(),
                product.price.clone(),
            ));
        }
        for purchase in &self.sandbox.purchases {
            backend.add_purchase(PurchaseRecord::new(
                purchase.token.as_str(),
                purchase
                    .products
                    .iter()
                    .map(|id| ProductId::new(id.as_str()))
                    .collect(),
                purchase.state.into(),
                purchase.acknowledged,
            ));
        }
        backend.script_connect(
            (0..self.sandbox.connect_failures)
                .map(|_| Err(BackendError::unavailable("sandbox connect failure"))),
        );
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [billing]
        reconnect_floor_ms = 500

        [sandbox]
        connect_failures = 2

        [[sandbox.products]]
        id = "coins_100"
        title = "100 Coins"
        price = "$0.99"

        [[sandbox.purchases]]
        token = "tok-1"
        products = ["coins_100"]
        state = "pending"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = RuntimeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.billing.product_ids, vec!["coins_100".to_string()]);
        assert_eq!(config.billing.reconnect_floor_ms, 500);
        assert_eq!(config.sandbox.connect_failures, 2);
        assert_eq!(
            config.sandbox.purchases[0].state,
            SandboxPurchaseState::Pending
        );
        assert!(!config.sandbox.purchases[0].acknowledged);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(RuntimeConfig::from_toml_str("[sandbox]\nconnect_failures = 0").is_err());
    }

    #[test]
    fn test_default_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.billing.validate().is_ok());
        assert_eq!(config.billing.product_ids.len(), 2);
    }

    #[test]
    fn test_backend_seeded() {
        let backend = RuntimeConfig::from_toml_str(SAMPLE).unwrap().build_backend();
        let purchases = backend.purchases();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].state, PurchaseState::Pending);
    }
}

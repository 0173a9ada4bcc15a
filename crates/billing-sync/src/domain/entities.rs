//! # Domain Entities
//!
//! The static product catalog, the per-product state table and cached
//! catalog entries.

use super::errors::BillingError;
use super::value_objects::{ProductId, SkuDetails, SkuState, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// The fixed universe of products known to this process.
///
/// Built once at startup and never mutated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductCatalog {
    products: BTreeSet<ProductId>,
}

impl ProductCatalog {
    /// Build a catalog. Duplicates collapse and insertion order is irrelevant.
    pub fn new<I, P>(products: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProductId>,
    {
        Self {
            products: products.into_iter().map(Into::into).collect(),
        }
    }

    /// Is `product_id` part of the catalog?
    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.products.contains(product_id)
    }

    /// Iterate products in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &ProductId> {
        self.products.iter()
    }

    /// The catalog as a set.
    pub fn as_set(&self) -> &BTreeSet<ProductId> {
        &self.products
    }

    /// Number of products.
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Is the catalog empty?
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// One applied state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    /// Product whose state changed.
    pub product_id: ProductId,
    /// State before the change.
    pub previous: SkuState,
    /// State after the change.
    pub current: SkuState,
}

/// Exactly one [`SkuState`] per catalog product.
///
/// Entries are created for every catalog product at construction and can
/// never be removed, so the table is always complete.
#[derive(Clone, Debug)]
pub struct SkuStateTable {
    states: BTreeMap<ProductId, SkuState>,
}

impl SkuStateTable {
    /// Table with every catalog product `Unpurchased`.
    pub fn new(catalog: &ProductCatalog) -> Self {
        Self {
            states: catalog
                .iter()
                .map(|id| (id.clone(), SkuState::default()))
                .collect(),
        }
    }

    /// Current state of `product_id`, `None` if unknown.
    pub fn get(&self, product_id: &ProductId) -> Option<SkuState> {
        self.states.get(product_id).copied()
    }

    /// Set the state of a known product.
    ///
    /// Returns the applied change, or `None` when the value was already
    /// current.
    ///
    /// # Errors
    /// - `UnknownProduct` if `product_id` is not in the catalog
    pub fn set(
        &mut self,
        product_id: &ProductId,
        state: SkuState,
    ) -> Result<Option<StateChange>, BillingError> {
        let slot = self
            .states
            .get_mut(product_id)
            .ok_or_else(|| BillingError::UnknownProduct(product_id.clone()))?;

        if *slot == state {
            return Ok(None);
        }

        let previous = std::mem::replace(slot, state);
        Ok(Some(StateChange {
            product_id: product_id.clone(),
            previous,
            current: state,
        }))
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<ProductId, SkuState> {
        self.states.clone()
    }

    /// Iterate entries in product order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProductId, &SkuState)> {
        self.states.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Cached catalog metadata for one product.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    /// Shared, immutable details. Replaced wholesale on refresh.
    pub details: Arc<SkuDetails>,
    /// When the details were last fetched successfully.
    pub fetched_at: Timestamp,
}

/// What started a reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconciliationTrigger {
    /// Purchase query after a successful connect.
    Connect,
    /// Purchase-update callback from the service.
    Update,
    /// Explicit refresh requested by the application.
    Manual,
}

impl ReconciliationTrigger {
    /// Stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconciliationTrigger::Connect => "connect",
            ReconciliationTrigger::Update => "update",
            ReconciliationTrigger::Manual => "manual",
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationSummary {
    /// Correlation id carried in the pass's tracing span.
    pub pass_id: Uuid,
    /// What started the pass.
    pub trigger: ReconciliationTrigger,
    /// Catalog products covered by the report.
    pub covered: usize,
    /// State entries that actually changed.
    pub changed: usize,
    /// Unknown product ids skipped.
    pub unknown: usize,
    /// Acknowledgments handed to the pipeline.
    pub acknowledgments_submitted: usize,
    /// The report belonged to an older connection attempt and was dropped.
    pub discarded: bool,
}

impl ReconciliationSummary {
    /// Summary for a pass whose report was dropped as stale.
    pub fn discarded(pass_id: Uuid, trigger: ReconciliationTrigger) -> Self {
        Self {
            pass_id,
            trigger,
            covered: 0,
            changed: 0,
            unknown: 0,
            acknowledgments_submitted: 0,
            discarded: true,
        }
    }
}

//! # Purchase State Store
//!
//! One [`SkuState`] per catalog product, with multicast change notification.
//!
//! All writes go through a [`StoreTransaction`], which holds the store lock
//! and publishes each applied change before the next one is made. Event
//! order therefore always matches write order.

use crate::domain::{
    invariant_table_complete, BillingError, ProductCatalog, ProductId, SkuState,
    SkuStateTable, StateChange,
};
use crate::events::{publish, state_changes, BillingEvent, BillingEventBus, StateChangeStream};
use billing_telemetry::{log_product_event, SKU_TRANSITIONS};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

/// Per-product purchase state.
pub struct PurchaseStateStore {
    table: Mutex<SkuStateTable>,
    catalog: Arc<ProductCatalog>,
    bus: Arc<BillingEventBus>,
}

impl PurchaseStateStore {
    /// Store with every catalog product `Unpurchased`.
    pub fn new(catalog: Arc<ProductCatalog>, bus: Arc<BillingEventBus>) -> Self {
        let table = SkuStateTable::new(&catalog);
        debug_assert!(invariant_table_complete(&catalog, &table));
        Self {
            table: Mutex::new(table),
            catalog,
            bus,
        }
    }

    /// The static catalog this store covers.
    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Current state. `None` only for unknown products.
    pub fn get(&self, product_id: &ProductId) -> Option<SkuState> {
        self.table.lock().get(product_id)
    }

    /// Set one product's state and notify subscribers.
    ///
    /// # Errors
    /// - `UnknownProduct` if `product_id` is not in the catalog (also logged)
    pub fn set(
        &self,
        product_id: &ProductId,
        state: SkuState,
    ) -> Result<Option<StateChange>, BillingError> {
        self.begin().set(product_id, state)
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<ProductId, SkuState> {
        self.table.lock().snapshot()
    }

    /// Stream of every subsequent change.
    pub fn subscribe(&self) -> StateChangeStream {
        state_changes(&self.bus)
    }

    /// Lock the store for a batch of writes.
    ///
    /// The lock is released when the transaction is dropped or finished.
    /// Never hold one across an `.await`.
    pub fn begin(&self) -> StoreTransaction<'_> {
        StoreTransaction {
            table: self.table.lock(),
            bus: &self.bus,
            changes: Vec::new(),
        }
    }
}

/// Exclusive write access to the store.
pub struct StoreTransaction<'a> {
    table: MutexGuard<'a, SkuStateTable>,
    bus: &'a BillingEventBus,
    changes: Vec<StateChange>,
}

impl StoreTransaction<'_> {
    /// Current state as seen inside the transaction.
    pub fn get(&self, product_id: &ProductId) -> Option<SkuState> {
        self.table.get(product_id)
    }

    /// Apply one write and publish it. Equal values are a no-op.
    pub fn set(
        &mut self,
        product_id: &ProductId,
        state: SkuState,
    ) -> Result<Option<StateChange>, BillingError> {
        let change = self.table.set(product_id, state).inspect_err(|_| {
            error!(
                product_id = %product_id,
                "[billing] Unknown SKU, check that it matches the store catalog"
            );
        })?;

        if let Some(change) = &change {
            log_product_event!(
                debug,
                "SKU state changed",
                change.product_id,
                from = change.previous.as_label(),
                to = change.current.as_label()
            );
            SKU_TRANSITIONS
                .with_label_values(&[change.current.as_label()])
                .inc();
            publish(
                self.bus,
                BillingEvent::SkuStateChanged {
                    product_id: change.product_id.clone(),
                    state: change.current,
                },
            );
            self.changes.push(change.clone());
        }
        Ok(change)
    }

    /// Changes applied so far.
    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }

    /// Release the lock and return the applied changes.
    pub fn finish(self) -> Vec<StateChange> {
        self.changes
    }
}

//! # Inbound Ports
//!
//! API trait defining what the billing engine offers the rest of the
//! application.

use crate::domain::{
    BillingError, ConnectionState, ProductId, PurchaseContext, ReconciliationSummary, SkuDetails,
    SkuState,
};
use crate::events::{NewPurchaseStream, StateChangeStream};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Billing API - inbound port.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Purchase state of a product. `None` only for ids outside the catalog.
    fn get_state(&self, product_id: &ProductId) -> Option<SkuState>;

    /// Cached catalog details of a product.
    ///
    /// Triggers a background refresh when the entry is stale or absent; the
    /// returned value is whatever is cached right now.
    fn get_details(&self, product_id: &ProductId) -> Option<Arc<SkuDetails>>;

    /// Stream of every subsequent state change.
    fn subscribe_state_changes(&self) -> StateChangeStream;

    /// Stream of product lists for freshly acknowledged purchases.
    ///
    /// Unlike state changes, announcements are queued per subscriber and
    /// never dropped.
    fn subscribe_new_purchases(&self) -> NewPurchaseStream;

    /// Launch the purchase flow for a product.
    ///
    /// # Errors
    /// - `NotConnected` unless the client is connected
    /// - `UnknownProduct` for ids outside the catalog
    /// - `CatalogNotReady` when no details are cached for the product
    /// - `PurchaseFlowFailure` when the service refuses to start the flow
    async fn request_purchase(
        &self,
        context: PurchaseContext,
        product_id: &ProductId,
    ) -> Result<(), BillingError>;

    /// Re-query purchases and reconcile the whole catalog.
    async fn refresh_purchases(&self) -> Result<ReconciliationSummary, BillingError>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Is a purchase flow awaiting its outcome?
    fn is_purchase_flow_in_progress(&self) -> bool;

    /// Receiver tracking the purchase-flow flag.
    fn watch_purchase_flow(&self) -> watch::Receiver<bool>;

    /// The static product catalog.
    fn known_products(&self) -> BTreeSet<ProductId>;
}

//! # Outbound Ports
//!
//! Traits for external dependencies: the billing service client and a clock.

use crate::domain::{
    BackendError, ProductId, PurchaseContext, PurchaseRecord, PurchaseToken, SkuDetails, Timestamp,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Billing service client - outbound port.
///
/// Every call may suspend and may fail. Implementations must be safe to call
/// from several tasks at once.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Open a connection to the billing service.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Fetch catalog details for the given products.
    ///
    /// The response may omit products the store does not know.
    async fn query_catalog(
        &self,
        product_ids: &BTreeSet<ProductId>,
    ) -> Result<Vec<SkuDetails>, BackendError>;

    /// Fetch the current purchase list.
    async fn query_purchases(&self) -> Result<Vec<PurchaseRecord>, BackendError>;

    /// Acknowledge a completed purchase.
    async fn acknowledge(&self, token: &PurchaseToken) -> Result<(), BackendError>;

    /// Launch the interactive purchase flow.
    ///
    /// `Ok` means the flow started. Its outcome arrives later as
    /// [`BackendEvent::PurchasesUpdated`].
    async fn launch_purchase_flow(
        &self,
        context: &PurchaseContext,
        details: &SkuDetails,
    ) -> Result<(), BackendError>;
}

/// Unsolicited callbacks from the billing service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// The service dropped the connection.
    ServiceDisconnected,
    /// Purchases changed, usually as the outcome of a purchase flow.
    PurchasesUpdated(Result<Vec<PurchaseRecord>, BackendError>),
}

/// Monotonic clock - outbound port.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

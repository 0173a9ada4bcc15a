//! # Domain Value Objects
//!
//! Immutable value types for the billing engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque identifier of a purchasable product (SKU).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a product id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Is the identifier blank?
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProductId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Token identifying a single purchase transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseToken(String);

impl PurchaseToken {
    /// Create a purchase token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PurchaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PurchaseToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PurchaseToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Local purchase state of one product.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkuState {
    /// Not owned (default).
    #[default]
    Unpurchased,
    /// Purchase started but payment not yet settled.
    Pending,
    /// Purchased, acknowledgment outstanding.
    Purchased,
    /// Purchased and acknowledged with the billing service.
    PurchasedAcknowledged,
}

impl SkuState {
    /// Does the user own the product in this state?
    pub fn is_owned(&self) -> bool {
        matches!(self, SkuState::Purchased | SkuState::PurchasedAcknowledged)
    }

    /// Stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SkuState::Unpurchased => "unpurchased",
            SkuState::Pending => "pending",
            SkuState::Purchased => "purchased",
            SkuState::PurchasedAcknowledged => "purchased_acknowledged",
        }
    }
}

/// Lifecycle state of a purchase as reported by the billing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseState {
    /// The service could not classify the purchase.
    Unspecified,
    /// Payment completed.
    Purchased,
    /// Payment pending (e.g. cash at a store).
    Pending,
}

/// Product metadata fetched from the remote catalog.
///
/// `price` is the already formatted display string; no currency logic here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuDetails {
    /// Product this metadata describes.
    pub product_id: ProductId,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
    /// Formatted price.
    pub price: String,
}

impl SkuDetails {
    /// Create product details.
    pub fn new(
        product_id: impl Into<ProductId>,
        title: impl Into<String>,
        description: impl Into<String>,
        price: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            title: title.into(),
            description: description.into(),
            price: price.into(),
        }
    }
}

/// One purchase as reported by the billing service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Unique transaction token.
    pub token: PurchaseToken,
    /// Products covered by the purchase.
    pub products: Vec<ProductId>,
    /// Lifecycle state.
    pub state: PurchaseState,
    /// Has the purchase been acknowledged?
    pub acknowledged: bool,
}

impl PurchaseRecord {
    /// Create a purchase record.
    pub fn new(
        token: impl Into<PurchaseToken>,
        products: Vec<ProductId>,
        state: PurchaseState,
        acknowledged: bool,
    ) -> Self {
        Self {
            token: token.into(),
            products,
            state,
            acknowledged,
        }
    }

    /// Completed but not yet acknowledged.
    pub fn needs_acknowledgment(&self) -> bool {
        self.state == PurchaseState::Purchased && !self.acknowledged
    }
}

/// Caller context handed to the billing service when launching a purchase flow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseContext {
    /// Obfuscated account identifier forwarded to the store for abuse checks.
    pub obfuscated_account_id: Option<String>,
}

impl PurchaseContext {
    /// Context carrying an obfuscated account id.
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            obfuscated_account_id: Some(account_id.into()),
        }
    }
}

/// Connection lifecycle state of the billing service client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and none in progress.
    #[default]
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Connected and serving requests.
    Connected,
}

impl ConnectionState {
    /// Numeric code used by the connection-state gauge.
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

/// Result code reported by the billing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingResponseCode {
    /// Success.
    Ok,
    /// The client lost its connection to the service.
    ServiceDisconnected,
    /// Network or service outage.
    ServiceUnavailable,
    /// Billing is not available on this device or account.
    BillingUnavailable,
    /// Requested product is not available for purchase.
    ItemUnavailable,
    /// Invalid arguments passed to the service.
    DeveloperError,
    /// Fatal service-side error.
    Error,
    /// The user backed out of the flow.
    UserCanceled,
    /// Requested feature unsupported by the installed service.
    FeatureNotSupported,
    /// The product is already owned.
    ItemAlreadyOwned,
    /// The product is not owned.
    ItemNotOwned,
}

impl BillingResponseCode {
    /// Stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BillingResponseCode::Ok => "ok",
            BillingResponseCode::ServiceDisconnected => "service_disconnected",
            BillingResponseCode::ServiceUnavailable => "service_unavailable",
            BillingResponseCode::BillingUnavailable => "billing_unavailable",
            BillingResponseCode::ItemUnavailable => "item_unavailable",
            BillingResponseCode::DeveloperError => "developer_error",
            BillingResponseCode::Error => "error",
            BillingResponseCode::UserCanceled => "user_canceled",
            BillingResponseCode::FeatureNotSupported => "feature_not_supported",
            BillingResponseCode::ItemAlreadyOwned => "item_already_owned",
            BillingResponseCode::ItemNotOwned => "item_not_owned",
        }
    }

    /// Transient service-side condition that a later attempt may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingResponseCode::ServiceDisconnected
                | BillingResponseCode::ServiceUnavailable
                | BillingResponseCode::Error
        )
    }
}

impl fmt::Display for BillingResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Monotonic timestamp in milliseconds since an arbitrary clock origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the clock origin.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Timestamp advanced by `duration`.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

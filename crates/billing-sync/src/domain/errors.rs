//! # Domain Errors
//!
//! Error types for the billing engine. None of them is fatal to the process.

use thiserror::Error;

use super::value_objects::{BillingResponseCode, ConnectionState, ProductId, PurchaseToken};

/// Failure reported by the billing backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("billing backend returned {code}: {message}")]
pub struct BackendError {
    /// Response code from the service.
    pub code: BillingResponseCode,
    /// Debug message from the service.
    pub message: String,
}

impl BackendError {
    /// Create a backend error.
    pub fn new(code: BillingResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Service unreachable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BillingResponseCode::ServiceUnavailable, message)
    }

    /// Connection dropped mid-call.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(BillingResponseCode::ServiceDisconnected, message)
    }

    /// The user canceled the purchase flow.
    pub fn user_canceled() -> Self {
        Self::new(BillingResponseCode::UserCanceled, "user canceled")
    }
}

/// Billing engine error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Connecting to the billing service failed. Retried with backoff.
    #[error("Connection to billing service failed: {0}")]
    ConnectionFailure(BackendError),

    /// Catalog query failed. Stale data keeps being served.
    #[error("Catalog fetch failed: {0}")]
    CatalogFetchFailure(BackendError),

    /// Purchase query failed. Reconciliation is skipped for this cycle.
    #[error("Purchase query failed: {0}")]
    PurchaseQueryFailure(BackendError),

    /// Acknowledging a purchase failed. Retried on the next pass.
    #[error("Acknowledgment of {token} failed: {cause}")]
    AcknowledgmentFailure {
        /// Token that could not be acknowledged
        token: PurchaseToken,
        /// Backend failure
        cause: BackendError,
    },

    /// Product id not in the static catalog.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// Purchase flow requested before the product details were fetched.
    #[error("Catalog not ready for product: {0}")]
    CatalogNotReady(ProductId),

    /// Purchase flow requested while the client is not connected.
    #[error("Billing client not connected (state: {0:?})")]
    NotConnected(ConnectionState),

    /// The backend refused to launch the purchase flow.
    #[error("Purchase flow failed: {0}")]
    PurchaseFlowFailure(BackendError),
}

impl BillingError {
    /// Backend response code behind this error, if any.
    pub fn response_code(&self) -> Option<BillingResponseCode> {
        match self {
            BillingError::ConnectionFailure(e)
            | BillingError::CatalogFetchFailure(e)
            | BillingError::PurchaseQueryFailure(e)
            | BillingError::PurchaseFlowFailure(e) => Some(e.code),
            BillingError::AcknowledgmentFailure { cause, .. } => Some(cause.code),
            BillingError::UnknownProduct(_)
            | BillingError::CatalogNotReady(_)
            | BillingError::NotConnected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::unavailable("network down");
        assert_eq!(
            err.to_string(),
            "billing backend returned service_unavailable: network down"
        );
    }

    #[test]
    fn test_acknowledgment_failure_display() {
        let err = BillingError::AcknowledgmentFailure {
            token: PurchaseToken::new("t1"),
            cause: BackendError::new(BillingResponseCode::Error, "boom"),
        };
        assert!(err.to_string().contains("t1"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_catalog_not_ready_display() {
        let err = BillingError::CatalogNotReady(ProductId::new("p2"));
        assert!(err.to_string().contains("p2"));
        assert_eq!(err.response_code(), None);
    }

    #[test]
    fn test_response_code_extraction() {
        let err = BillingError::PurchaseFlowFailure(BackendError::new(
            BillingResponseCode::ItemAlreadyOwned,
            "owned",
        ));
        assert_eq!(
            err.response_code(),
            Some(BillingResponseCode::ItemAlreadyOwned)
        );
    }

    #[test]
    fn test_not_connected_display() {
        let err = BillingError::NotConnected(ConnectionState::Connecting);
        assert!(err.to_string().contains("Connecting"));
    }
}

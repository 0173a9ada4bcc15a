//! In-Memory Billing Backend
//!
//! Implements the `BillingBackend` port without a store. Used by the sandbox
//! runtime and by tests, which script failures and delays and inspect the
//! recorded calls.

use crate::domain::{
    BackendError, BillingResponseCode, ProductId, PurchaseContext, PurchaseRecord, PurchaseState,
    PurchaseToken, SkuDetails,
};
use crate::ports::{BackendEvent, BillingBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Default)]
struct BackendState {
    catalog: BTreeMap<ProductId, SkuDetails>,
    purchases: Vec<PurchaseRecord>,
    connected: bool,

    connect_script: VecDeque<Result<(), BackendError>>,
    catalog_failure: Option<BackendError>,
    purchases_failure: Option<BackendError>,
    ack_failures: VecDeque<BackendError>,
    launch_failure: Option<BackendError>,

    catalog_delay: Option<Duration>,
    purchases_delay: Option<Duration>,
    ack_delay: Option<Duration>,

    connect_attempts: Vec<Instant>,
    catalog_queries: Vec<BTreeSet<ProductId>>,
    purchase_queries: usize,
    ack_calls: HashMap<PurchaseToken, usize>,
    launched_flows: Vec<(PurchaseContext, ProductId)>,

    events: Option<mpsc::UnboundedSender<BackendEvent>>,
}

/// Scriptable in-memory billing service.
#[derive(Default)]
pub struct InMemoryBillingBackend {
    state: Mutex<BackendState>,
}

impl InMemoryBillingBackend {
    /// Empty backend: no products, no purchases, every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product to the remote catalog.
    #[must_use]
    pub fn with_product(self, details: SkuDetails) -> Self {
        self.add_product(details);
        self
    }

    /// Add a purchase to the remote purchase list.
    #[must_use]
    pub fn with_purchase(self, record: PurchaseRecord) -> Self {
        self.add_purchase(record);
        self
    }

    /// Add or replace a product in the remote catalog.
    pub fn add_product(&self, details: SkuDetails) {
        self.state
            .lock()
            .catalog
            .insert(details.product_id.clone(), details);
    }

    /// Add a purchase to the remote purchase list.
    pub fn add_purchase(&self, record: PurchaseRecord) {
        self.state.lock().purchases.push(record);
    }

    /// Replace the remote purchase list.
    pub fn set_purchases(&self, purchases: Vec<PurchaseRecord>) {
        self.state.lock().purchases = purchases;
    }

    /// Current remote purchase list.
    pub fn purchases(&self) -> Vec<PurchaseRecord> {
        self.state.lock().purchases.clone()
    }

    /// Queue results for upcoming `connect` calls. Unscripted calls succeed.
    pub fn script_connect<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<(), BackendError>>,
    {
        self.state.lock().connect_script.extend(results);
    }

    /// Make every catalog query fail with `error` (or succeed again with `None`).
    pub fn fail_catalog(&self, error: Option<BackendError>) {
        self.state.lock().catalog_failure = error;
    }

    /// Make every purchase query fail with `error` (or succeed again with `None`).
    pub fn fail_purchases(&self, error: Option<BackendError>) {
        self.state.lock().purchases_failure = error;
    }

    /// Fail the next `count` acknowledgments with `error`.
    pub fn fail_next_acknowledgments(&self, count: usize, error: BackendError) {
        let mut state = self.state.lock();
        state
            .ack_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Make purchase-flow launches fail with `error` (or succeed with `None`).
    pub fn fail_launch(&self, error: Option<BackendError>) {
        self.state.lock().launch_failure = error;
    }

    /// Delay catalog responses.
    pub fn set_catalog_delay(&self, delay: Option<Duration>) {
        self.state.lock().catalog_delay = delay;
    }

    /// Delay purchase-query responses.
    pub fn set_purchases_delay(&self, delay: Option<Duration>) {
        self.state.lock().purchases_delay = delay;
    }

    /// Delay acknowledgment responses.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state.lock().ack_delay = delay;
    }

    /// Channel on which this backend delivers its callbacks.
    ///
    /// Replaces any earlier channel.
    pub fn event_channel(&self) -> mpsc::UnboundedReceiver<BackendEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().events = Some(tx);
        rx
    }

    /// Deliver a purchase-update callback.
    pub fn push_purchase_update(&self, update: Result<Vec<PurchaseRecord>, BackendError>) {
        self.emit(BackendEvent::PurchasesUpdated(update));
    }

    /// Simulate the service dropping the connection.
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
        self.emit(BackendEvent::ServiceDisconnected);
    }

    /// Simulate the user completing a purchase flow.
    ///
    /// Records a purchased, unacknowledged purchase and delivers it as an
    /// update callback.
    pub fn complete_purchase_flow(&self, token: impl Into<PurchaseToken>, products: Vec<ProductId>) {
        let record = PurchaseRecord::new(token, products, PurchaseState::Purchased, false);
        self.add_purchase(record.clone());
        self.push_purchase_update(Ok(vec![record]));
    }

    /// Simulate the user backing out of a purchase flow.
    pub fn cancel_purchase_flow(&self) {
        self.push_purchase_update(Err(BackendError::user_canceled()));
    }

    /// Instants at which `connect` was called.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state.lock().connect_attempts.clone()
    }

    /// Product sets requested by catalog queries, in call order.
    pub fn catalog_queries(&self) -> Vec<BTreeSet<ProductId>> {
        self.state.lock().catalog_queries.clone()
    }

    /// Number of purchase queries served.
    pub fn purchase_queries(&self) -> usize {
        self.state.lock().purchase_queries
    }

    /// Number of acknowledge calls for `token`.
    pub fn ack_calls(&self, token: &PurchaseToken) -> usize {
        self.state.lock().ack_calls.get(token).copied().unwrap_or(0)
    }

    /// Number of acknowledge calls across all tokens.
    pub fn total_ack_calls(&self) -> usize {
        self.state.lock().ack_calls.values().sum()
    }

    /// Purchase flows launched, in call order.
    pub fn launched_flows(&self) -> Vec<(PurchaseContext, ProductId)> {
        self.state.lock().launched_flows.clone()
    }

    /// Is the simulated connection up?
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn emit(&self, event: BackendEvent) {
        let sender = self.state.lock().events.clone();
        match sender {
            Some(tx) => {
                if tx.send(event).is_err() {
                    warn!("[billing] Backend event dropped: receiver closed");
                }
            }
            None => debug!("[billing] Backend event dropped: no channel attached"),
        }
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(BackendError::disconnected("client is not connected"))
        }
    }
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl BillingBackend for InMemoryBillingBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.connect_attempts.push(Instant::now());
        let result = state.connect_script.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    async fn query_catalog(
        &self,
        product_ids: &BTreeSet<ProductId>,
    ) -> Result<Vec<SkuDetails>, BackendError> {
        let delay = {
            let mut state = self.state.lock();
            state.catalog_queries.push(product_ids.clone());
            state.catalog_delay
        };
        pause(delay).await;

        self.ensure_connected()?;
        let state = self.state.lock();
        if let Some(error) = &state.catalog_failure {
            return Err(error.clone());
        }
        Ok(product_ids
            .iter()
            .filter_map(|id| state.catalog.get(id).cloned())
            .collect())
    }

    async fn query_purchases(&self) -> Result<Vec<PurchaseRecord>, BackendError> {
        let delay = {
            let mut state = self.state.lock();
            state.purchase_queries += 1;
            state.purchases_delay
        };
        pause(delay).await;

        self.ensure_connected()?;
        let state = self.state.lock();
        if let Some(error) = &state.purchases_failure {
            return Err(error.clone());
        }
        Ok(state.purchases.clone())
    }

    async fn acknowledge(&self, token: &PurchaseToken) -> Result<(), BackendError> {
        let delay = {
            let mut state = self.state.lock();
            *state.ack_calls.entry(token.clone()).or_insert(0) += 1;
            state.ack_delay
        };
        pause(delay).await;

        let mut state = self.state.lock();
        if let Some(error) = state.ack_failures.pop_front() {
            return Err(error);
        }

        let record = state.purchases.iter_mut().find(|p| &p.token == token);
        match record {
            Some(record) => {
                record.acknowledged = true;
                Ok(())
            }
            None => Err(BackendError::new(
                BillingResponseCode::ItemNotOwned,
                format!("no purchase for token {token}"),
            )),
        }
    }

    async fn launch_purchase_flow(
        &self,
        context: &PurchaseContext,
        details: &SkuDetails,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        if let Some(error) = &state.launch_failure {
            return Err(error.clone());
        }
        if !state.catalog.contains_key(&details.product_id) {
            return Err(BackendError::new(
                BillingResponseCode::ItemUnavailable,
                format!("{} is not for sale", details.product_id),
            ));
        }
        state
            .launched_flows
            .push((context.clone(), details.product_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(id: &str) -> SkuDetails {
        SkuDetails::new(id, format!("{id} title"), "desc", "$1.00")
    }

    #[tokio::test]
    async fn test_connect_follows_script() {
        let backend = InMemoryBillingBackend::new();
        backend.script_connect([Err(BackendError::unavailable("down"))]);

        assert!(backend.connect().await.is_err());
        assert!(!backend.is_connected());
        assert!(backend.connect().await.is_ok());
        assert!(backend.is_connected());
        assert_eq!(backend.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_omits_unknown_products() {
        let backend = InMemoryBillingBackend::new().with_product(details("p1"));
        backend.connect().await.unwrap();

        let ids: BTreeSet<ProductId> = ["p1", "p2"].into_iter().map(ProductId::new).collect();
        let result = backend.query_catalog(&ids).await.unwrap();
        assert_eq!(result, vec![details("p1")]);
    }

    #[tokio::test]
    async fn test_queries_require_connection() {
        let backend = InMemoryBillingBackend::new();
        let err = backend.query_purchases().await.unwrap_err();
        assert_eq!(err.code, BillingResponseCode::ServiceDisconnected);
    }

    #[tokio::test]
    async fn test_acknowledge_marks_purchase() {
        let backend = InMemoryBillingBackend::new().with_purchase(PurchaseRecord::new(
            "t1",
            vec![ProductId::new("p1")],
            PurchaseState::Purchased,
            false,
        ));
        backend.acknowledge(&PurchaseToken::new("t1")).await.unwrap();
        assert!(backend.purchases()[0].acknowledged);
        assert_eq!(backend.ack_calls(&PurchaseToken::new("t1")), 1);
    }

    #[tokio::test]
    async fn test_scripted_ack_failure() {
        let backend = InMemoryBillingBackend::new().with_purchase(PurchaseRecord::new(
            "t1",
            vec![ProductId::new("p1")],
            PurchaseState::Purchased,
            false,
        ));
        backend.fail_next_acknowledgments(1, BackendError::unavailable("down"));
        let token = PurchaseToken::new("t1");
        assert!(backend.acknowledge(&token).await.is_err());
        assert!(backend.acknowledge(&token).await.is_ok());
        assert_eq!(backend.ack_calls(&token), 2);
    }

    #[tokio::test]
    async fn test_events_delivered_on_channel() {
        let backend = InMemoryBillingBackend::new();
        let mut rx = backend.event_channel();
        backend.drop_connection();
        backend.complete_purchase_flow("t9", vec![ProductId::new("p1")]);

        assert_eq!(rx.recv().await, Some(BackendEvent::ServiceDisconnected));
        match rx.recv().await {
            Some(BackendEvent::PurchasesUpdated(Ok(records))) => {
                assert_eq!(records.len(), 1);
                assert!(records[0].needs_acknowledgment());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

//! # Test Harness
//!
//! A `BillingService` wired to a scriptable in-memory backend, with the
//! backend callback channel attached.

use std::sync::Arc;

use billing_sync::{
    BillingApi, BillingConfig, BillingService, InMemoryBillingBackend, ManualClock, ProductId,
    PurchaseRecord, PurchaseState, SkuDetails, SkuState, Timestamp,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Service under test plus its collaborators.
pub struct Harness {
    /// Simulated billing service.
    pub backend: Arc<InMemoryBillingBackend>,
    /// Clock driving catalog staleness.
    pub clock: Arc<ManualClock>,
    /// The engine.
    pub service: Arc<BillingService>,
    callbacks: JoinHandle<()>,
}

impl Harness {
    /// Engine over catalog `{p1, p2}` with default timings.
    pub fn new(backend: InMemoryBillingBackend) -> Self {
        Self::with_config(BillingConfig::for_testing(), backend)
    }

    /// Engine with an explicit configuration.
    pub fn with_config(config: BillingConfig, backend: InMemoryBillingBackend) -> Self {
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let service = Arc::new(
            BillingService::new(config, backend.clone(), clock.clone())
                .expect("test config is valid"),
        );
        let callbacks = service.attach_backend_events(backend.event_channel());
        Self {
            backend,
            clock,
            service,
            callbacks,
        }
    }

    /// Connect, expecting success.
    pub async fn connect(&self) {
        self.service.start().await.expect("connect succeeds");
    }

    /// Purchase state of `id`.
    pub fn state(&self, id: &str) -> Option<SkuState> {
        self.service.get_state(&pid(id))
    }

    /// Record every state change from now on.
    pub fn record_state_changes(&self) -> Arc<Mutex<Vec<(ProductId, SkuState)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let mut stream = self.service.subscribe_state_changes();
        tokio::spawn(async move {
            while let Some(change) = stream.recv().await {
                sink.lock().push(change);
            }
        });
        log
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.service.shutdown();
        self.callbacks.abort();
    }
}

/// Product id shorthand.
pub fn pid(id: &str) -> ProductId {
    ProductId::new(id)
}

/// Catalog details for `id`.
pub fn details(id: &str, price: &str) -> SkuDetails {
    SkuDetails::new(id, format!("{id} title"), format!("{id} description"), price)
}

/// A completed purchase of `products`.
pub fn purchased(token: &str, products: &[&str], acknowledged: bool) -> PurchaseRecord {
    PurchaseRecord::new(
        token,
        products.iter().map(|id| pid(id)).collect(),
        PurchaseState::Purchased,
        acknowledged,
    )
}

/// A pending purchase of `products`.
pub fn pending(token: &str, products: &[&str]) -> PurchaseRecord {
    PurchaseRecord::new(
        token,
        products.iter().map(|id| pid(id)).collect(),
        PurchaseState::Pending,
        false,
    )
}

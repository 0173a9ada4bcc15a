//! # Billing Service
//!
//! Application service wiring the engine together and exposing
//! [`BillingApi`].
//!
//! ```text
//!                 ┌────────────────────────┐
//!  backend ──────▶│  ConnectionController  │──▶ BackoffScheduler
//!  callbacks      └───────────┬────────────┘
//!                             │
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!        CatalogCache     Reconciler ──▶ AcknowledgmentPipeline
//!                             │              │
//!                             ▼              ▼
//!           BillingEventBus ◀── PurchaseStateStore   PurchaseAnnouncer
//! ```

use crate::application::ack_pipeline::AcknowledgmentPipeline;
use crate::application::backoff_scheduler::BackoffScheduler;
use crate::application::catalog_cache::CatalogCache;
use crate::application::connection::ConnectionTracker;
use crate::application::controller::ConnectionController;
use crate::application::reconciler::Reconciler;
use crate::application::state_store::PurchaseStateStore;
use crate::config::{BillingConfig, ConfigError};
use crate::domain::{
    BillingError, ConnectionState, ProductCatalog, ProductId, PurchaseContext,
    ReconciliationSummary, SkuDetails, SkuState,
};
use crate::events::{
    connection_changes, BillingEventBus, ConnectionStream, NewPurchaseStream,
    StateChangeStream,
};
use crate::ports::{BackendEvent, BillingApi, BillingBackend, Clock};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Billing Service - the engine's single entry point.
pub struct BillingService {
    /// Configuration.
    config: BillingConfig,
    /// Static product catalog.
    catalog: Arc<ProductCatalog>,
    /// Event fan-out.
    bus: Arc<BillingEventBus>,
    /// Purchase state per product.
    store: Arc<PurchaseStateStore>,
    /// Product details.
    catalog_cache: Arc<CatalogCache>,
    /// Acknowledgment bookkeeping.
    pipeline: Arc<AcknowledgmentPipeline>,
    /// Connection lifecycle.
    controller: Arc<ConnectionController>,
}

impl BillingService {
    /// Build the engine. Nothing connects until [`BillingService::start`].
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(
        config: BillingConfig,
        backend: Arc<dyn BillingBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let catalog = Arc::new(config.catalog());
        let bus = Arc::new(BillingEventBus::with_capacity(config.event_buffer_capacity));
        let connection = Arc::new(ConnectionTracker::new(bus.clone()));
        let store = Arc::new(PurchaseStateStore::new(catalog.clone(), bus.clone()));
        let catalog_cache = Arc::new(CatalogCache::new(
            backend.clone(),
            clock,
            connection.clone(),
            catalog.clone(),
            config.catalog_staleness(),
        ));
        let pipeline = Arc::new(AcknowledgmentPipeline::new(
            backend.clone(),
            store.clone(),
            connection.clone(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            pipeline.clone(),
            connection.clone(),
            config.auto_acknowledge,
        );
        let scheduler =
            BackoffScheduler::new(config.reconnect_floor(), config.reconnect_ceiling());
        let controller = Arc::new(ConnectionController::new(
            backend,
            connection,
            scheduler,
            catalog_cache.clone(),
            reconciler,
            catalog.clone(),
        ));

        info!(
            products = catalog.len(),
            auto_acknowledge = config.auto_acknowledge,
            "[billing] Billing service created"
        );

        Ok(Self {
            config,
            catalog,
            bus,
            store,
            catalog_cache,
            pipeline,
            controller,
        })
    }

    /// Connect, refresh the catalog and reconcile purchases.
    ///
    /// Failure schedules reconnects in the background; the error is returned
    /// for the first attempt only.
    pub async fn start(&self) -> Result<(), BillingError> {
        self.controller.start().await
    }

    /// Process backend callbacks from `events` in arrival order.
    pub fn attach_backend_events(
        &self,
        events: mpsc::UnboundedReceiver<BackendEvent>,
    ) -> JoinHandle<()> {
        self.controller.attach_backend_events(events)
    }

    /// Process one backend callback.
    pub fn handle_backend_event(&self, event: BackendEvent) {
        self.controller.handle_backend_event(event);
    }

    /// Stop: disconnect, drop in-flight results and cancel retries.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }

    /// Current state of every catalog product.
    pub fn snapshot(&self) -> BTreeMap<ProductId, SkuState> {
        self.store.snapshot()
    }

    /// Stream of connection-state changes.
    pub fn subscribe_connection(&self) -> ConnectionStream {
        connection_changes(&self.bus)
    }

    /// The configuration in use.
    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// The event bus.
    pub fn bus(&self) -> &Arc<BillingEventBus> {
        &self.bus
    }

    /// The connection controller.
    pub fn controller(&self) -> &Arc<ConnectionController> {
        &self.controller
    }

    /// The catalog cache.
    pub fn catalog_cache(&self) -> &Arc<CatalogCache> {
        &self.catalog_cache
    }

    /// The acknowledgment pipeline.
    pub fn pipeline(&self) -> &Arc<AcknowledgmentPipeline> {
        &self.pipeline
    }
}

#[async_trait]
impl BillingApi for BillingService {
    fn get_state(&self, product_id: &ProductId) -> Option<SkuState> {
        self.store.get(product_id)
    }

    fn get_details(&self, product_id: &ProductId) -> Option<Arc<SkuDetails>> {
        self.catalog_cache.ensure_fresh(product_id);
        self.catalog_cache.get(product_id)
    }

    fn subscribe_state_changes(&self) -> StateChangeStream {
        self.store.subscribe()
    }

    fn subscribe_new_purchases(&self) -> NewPurchaseStream {
        self.pipeline.subscribe_new_purchases()
    }

    async fn request_purchase(
        &self,
        context: PurchaseContext,
        product_id: &ProductId,
    ) -> Result<(), BillingError> {
        self.controller
            .launch_purchase_flow(context, product_id)
            .await
    }

    async fn refresh_purchases(&self) -> Result<ReconciliationSummary, BillingError> {
        self.controller.refresh_purchases().await
    }

    fn connection_state(&self) -> ConnectionState {
        self.controller.state()
    }

    fn is_purchase_flow_in_progress(&self) -> bool {
        self.controller.is_purchase_flow_in_progress()
    }

    fn watch_purchase_flow(&self) -> watch::Receiver<bool> {
        self.controller.watch_purchase_flow()
    }

    fn known_products(&self) -> BTreeSet<ProductId> {
        self.catalog.as_set().clone()
    }
}

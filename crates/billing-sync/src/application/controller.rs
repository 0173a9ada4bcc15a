//! # Connection Controller
//!
//! Owns the billing-service connection lifecycle.
//!
//! ```text
//!                start()               connect ok
//! ┌──────────────┐ ────────▶ ┌────────────┐ ────────▶ ┌───────────┐
//! │ Disconnected │           │ Connecting │           │ Connected │
//! └──────────────┘ ◀──────── └────────────┘           └───────────┘
//!        ▲        connect failed                             │
//!        └────────────────────────────────────────────────────┘
//!                          service disconnected
//! ```
//!
//! Every fall back to `Disconnected` schedules a retry through the backoff
//! scheduler. A successful connect resets the backoff, refreshes the catalog
//! and reconciles purchases.

use crate::application::backoff_scheduler::BackoffScheduler;
use crate::application::catalog_cache::CatalogCache;
use crate::application::connection::ConnectionTracker;
use crate::application::reconciler::Reconciler;
use crate::domain::{
    BackendError, BillingError, BillingResponseCode, ConnectionState, ProductCatalog, ProductId,
    PurchaseContext, PurchaseRecord, ReconciliationSummary, ReconciliationTrigger,
};
use crate::ports::{BackendEvent, BillingBackend};
use billing_telemetry::{log_product_event, CONNECT_ATTEMPTS};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives connect, reconnect and the post-connect refresh.
pub struct ConnectionController {
    backend: Arc<dyn BillingBackend>,
    connection: Arc<ConnectionTracker>,
    scheduler: BackoffScheduler,
    catalog_cache: Arc<CatalogCache>,
    reconciler: Reconciler,
    catalog: Arc<ProductCatalog>,
    purchase_flow: watch::Sender<bool>,
}

impl ConnectionController {
    /// Create a controller in `Disconnected`.
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        connection: Arc<ConnectionTracker>,
        scheduler: BackoffScheduler,
        catalog_cache: Arc<CatalogCache>,
        reconciler: Reconciler,
        catalog: Arc<ProductCatalog>,
    ) -> Self {
        let (purchase_flow, _) = watch::channel(false);
        Self {
            backend,
            connection,
            scheduler,
            catalog_cache,
            reconciler,
            catalog,
            purchase_flow,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The retry scheduler.
    pub fn scheduler(&self) -> &BackoffScheduler {
        &self.scheduler
    }

    /// Make one connection attempt.
    ///
    /// On success the catalog is refreshed and purchases are reconciled
    /// before this returns. On failure a retry is scheduled and the error is
    /// returned. Does nothing unless `Disconnected`.
    pub async fn start(self: &Arc<Self>) -> Result<(), BillingError> {
        let Some(attempt) = self.connection.begin_attempt() else {
            debug!(state = ?self.state(), "Connect skipped, not disconnected");
            return Ok(());
        };
        info!(attempt, "[billing] Connecting to billing service");

        match self.backend.connect().await {
            Ok(()) => {
                self.on_connected(attempt).await;
                Ok(())
            }
            Err(e) => {
                self.on_connect_failed(attempt, &e);
                Err(BillingError::ConnectionFailure(e))
            }
        }
    }

    /// Start a connection attempt on a background task.
    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are logged and retried inside start.
            let _ = controller.start().await;
        })
    }

    async fn on_connected(&self, attempt: u64) {
        if !self.connection.mark_connected(attempt) {
            CONNECT_ATTEMPTS.with_label_values(&["discarded"]).inc();
            debug!(attempt, "Connect result from an outdated attempt ignored");
            return;
        }
        CONNECT_ATTEMPTS.with_label_values(&["connected"]).inc();
        self.scheduler.reset();
        info!(attempt, "[billing] Billing service connected");

        let (catalog, purchases) = tokio::join!(
            self.catalog_cache.refresh_all(),
            self.reconcile_all(ReconciliationTrigger::Connect)
        );
        if let Err(e) = catalog {
            debug!(error = %e, "Catalog refresh after connect failed");
        }
        if let Err(e) = purchases {
            debug!(error = %e, "Purchase refresh after connect failed");
        }
    }

    fn on_connect_failed(self: &Arc<Self>, attempt: u64, error: &BackendError) {
        CONNECT_ATTEMPTS.with_label_values(&["failed"]).inc();
        warn!(
            attempt,
            code = %error.code,
            message = %error.message,
            "[billing] Billing service connection failed"
        );
        if self.connection.mark_disconnected(Some(attempt)) {
            self.schedule_reconnect();
        }
    }

    /// The service dropped the connection.
    pub fn on_service_disconnected(self: &Arc<Self>) {
        if self.state() != ConnectionState::Connected {
            debug!(state = ?self.state(), "Disconnect callback ignored");
            return;
        }
        if self.connection.mark_disconnected(None) {
            warn!("[billing] Billing service disconnected");
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.connection.is_shut_down() {
            return;
        }
        let controller = Arc::clone(self);
        self.scheduler.schedule(move || {
            controller.spawn_start();
        });
    }

    /// Query purchases and reconcile the whole catalog.
    ///
    /// # Errors
    /// - `NotConnected` unless connected
    /// - `PurchaseQueryFailure` when the query fails; nothing is changed
    pub async fn refresh_purchases(&self) -> Result<ReconciliationSummary, BillingError> {
        self.reconcile_all(ReconciliationTrigger::Manual).await
    }

    async fn reconcile_all(
        &self,
        trigger: ReconciliationTrigger,
    ) -> Result<ReconciliationSummary, BillingError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(BillingError::NotConnected(state));
        }
        let attempt = self.connection.current_attempt();
        debug!(trigger = trigger.as_label(), "Refreshing purchases");

        let records = self.backend.query_purchases().await.map_err(|e| {
            warn!(
                code = %e.code,
                message = %e.message,
                "[billing] Problem getting purchases"
            );
            BillingError::PurchaseQueryFailure(e)
        })?;

        Ok(self
            .reconciler
            .apply(&records, Some(self.catalog.as_set()), trigger, attempt))
    }

    /// Launch the purchase flow for `product_id`.
    ///
    /// # Errors
    /// - `NotConnected` unless connected
    /// - `UnknownProduct` for ids outside the catalog
    /// - `CatalogNotReady` when no details are cached
    /// - `PurchaseFlowFailure` when the service refuses
    pub async fn launch_purchase_flow(
        &self,
        context: PurchaseContext,
        product_id: &ProductId,
    ) -> Result<(), BillingError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(BillingError::NotConnected(state));
        }
        if !self.catalog.contains(product_id) {
            return Err(BillingError::UnknownProduct(product_id.clone()));
        }
        let Some(details) = self.catalog_cache.get(product_id) else {
            log_product_event!(warn, "SkuDetails not found, cannot launch purchase flow", product_id);
            return Err(BillingError::CatalogNotReady(product_id.clone()));
        };

        self.backend
            .launch_purchase_flow(&context, &details)
            .await
            .map_err(|e| {
                log_product_event!(warn, "Billing flow failed", product_id, code = %e.code, message = %e.message);
                BillingError::PurchaseFlowFailure(e)
            })?;

        self.purchase_flow.send_replace(true);
        log_product_event!(info, "Purchase flow launched", product_id);
        Ok(())
    }

    /// Outcome of a purchase flow, or an unsolicited purchase change.
    ///
    /// Always clears the purchase-flow flag. A non-empty list is reconciled
    /// without resetting uncovered products.
    pub fn on_purchases_updated(
        &self,
        update: Result<Vec<PurchaseRecord>, BackendError>,
    ) -> Option<ReconciliationSummary> {
        self.purchase_flow.send_replace(false);
        match update {
            Ok(records) if records.is_empty() => {
                debug!("Purchase update with no purchases");
                None
            }
            Ok(records) => Some(self.reconciler.apply(
                &records,
                None,
                ReconciliationTrigger::Update,
                self.connection.current_attempt(),
            )),
            Err(e) if e.code == BillingResponseCode::UserCanceled => {
                info!("[billing] User canceled the purchase flow");
                None
            }
            Err(e) => {
                warn!(code = %e.code, message = %e.message, "[billing] Purchase update failed");
                None
            }
        }
    }

    /// Dispatch one backend callback.
    pub fn handle_backend_event(self: &Arc<Self>, event: BackendEvent) {
        match event {
            BackendEvent::ServiceDisconnected => self.on_service_disconnected(),
            BackendEvent::PurchasesUpdated(update) => {
                self.on_purchases_updated(update);
            }
        }
    }

    /// Drain backend callbacks in arrival order until the channel closes or
    /// the controller shuts down.
    pub fn attach_backend_events(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BackendEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if controller.connection.is_shut_down() {
                    break;
                }
                controller.handle_backend_event(event);
            }
            debug!("Backend event channel drained");
        })
    }

    /// Is a purchase flow awaiting its outcome?
    pub fn is_purchase_flow_in_progress(&self) -> bool {
        *self.purchase_flow.borrow()
    }

    /// Receiver tracking the purchase-flow flag.
    pub fn watch_purchase_flow(&self) -> watch::Receiver<bool> {
        self.purchase_flow.subscribe()
    }

    /// Disconnect, drop in-flight results and cancel pending retries.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        self.scheduler.cancel_all();
        self.purchase_flow.send_replace(false);
        info!("[billing] Billing controller shut down");
    }
}

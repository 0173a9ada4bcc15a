//! # Billing Runtime
//!
//! Owns the billing service and the background tasks that watch it.
//!
//! ## Startup Sequence
//!
//! 1. Build the in-memory backend from the sandbox seed
//! 2. Create `BillingService` and attach the backend callback channel
//! 3. Start watchers for state changes, new purchases and connection changes
//! 4. Connect (failures retry in the background)

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use billing_sync::{
    BillingApi, BillingService, ConnectionStream, InMemoryBillingBackend, NewPurchaseStream,
    ProductId, PurchaseContext, SkuState, StateChangeStream, SystemClock,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::sandbox::RuntimeConfig;

/// The sandbox runtime.
pub struct BillingRuntime {
    /// The engine.
    service: Arc<BillingService>,
    /// The simulated billing service.
    backend: Arc<InMemoryBillingBackend>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
    /// Watcher and callback tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl BillingRuntime {
    /// Create the runtime. Nothing runs until [`BillingRuntime::start`].
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        info!("Creating billing runtime");
        let backend = Arc::new(config.build_backend());
        let service = Arc::new(BillingService::new(
            config.billing,
            backend.clone(),
            Arc::new(SystemClock::new()),
        )?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            service,
            backend,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// Start watchers and connect.
    ///
    /// A failed first connect is logged, not returned: the engine keeps
    /// retrying with backoff.
    pub async fn start(&mut self) -> Result<()> {
        info!("===========================================");
        info!("  Billing Runtime v{}", billing_sync::VERSION);
        info!("  Backend: in-memory sandbox");
        info!("===========================================");

        let events = self.backend.event_channel();
        self.tasks.push(self.service.attach_backend_events(events));

        let states = self.service.subscribe_state_changes();
        self.tasks.push(spawn_state_watcher(states, self.shutdown_rx.clone()));
        let purchases = self.service.subscribe_new_purchases();
        self.tasks.push(spawn_purchase_watcher(purchases, self.shutdown_rx.clone()));
        let connection = self.service.subscribe_connection();
        self.tasks.push(spawn_connection_watcher(connection, self.shutdown_rx.clone()));

        if let Err(e) = self.service.start().await {
            warn!("Initial connect failed, retrying in background: {}", e);
        }

        info!(
            "Watching {} products",
            self.service.known_products().len()
        );
        Ok(())
    }

    /// Launch a purchase and let the sandbox complete it.
    pub async fn simulate_purchase(&self, product_id: &ProductId, token: &str) -> Result<()> {
        self.service
            .request_purchase(PurchaseContext::default(), product_id)
            .await?;
        self.backend
            .complete_purchase_flow(token, vec![product_id.clone()]);
        Ok(())
    }

    /// Current state of every product.
    pub fn snapshot(&self) -> BTreeMap<ProductId, SkuState> {
        self.service.snapshot()
    }

    /// Current state of every product as pretty JSON.
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// The engine.
    pub fn service(&self) -> Arc<BillingService> {
        Arc::clone(&self.service)
    }

    /// The simulated billing service.
    pub fn backend(&self) -> Arc<InMemoryBillingBackend> {
        Arc::clone(&self.backend)
    }

    /// Stop the engine and every watcher.
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");
        self.service.shutdown();

        if self.shutdown_tx.send(true).is_err() {
            warn!("No watcher was listening for shutdown");
        }
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        info!("Shutdown complete");
    }
}

fn spawn_state_watcher(
    mut states: StateChangeStream,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = states.recv() => match change {
                    Some((product_id, state)) => {
                        info!(product_id = %product_id, state = state.as_label(), "SKU state changed");
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        if states.lagged_events() > 0 {
            warn!(lost = states.lagged_events(), "State watcher fell behind");
        }
    })
}

fn spawn_purchase_watcher(
    mut purchases: NewPurchaseStream,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                products = purchases.recv() => match products {
                    Some(products) => info!(?products, "New purchase"),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_connection_watcher(
    mut connection: ConnectionStream,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                state = connection.recv() => match state {
                    Some(state) => info!(?state, "Connection state changed"),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

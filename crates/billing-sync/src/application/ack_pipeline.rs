//! # Acknowledgment Pipeline
//!
//! Acknowledges completed purchases with the billing service, at most once
//! in flight per token.
//!
//! The ledger (tokens in flight plus tokens acknowledged in this process)
//! sits behind one mutex, so the claim check and the success bookkeeping are
//! atomic. Lock order is store first, then ledger.

use crate::algorithms::PendingAcknowledgment;
use crate::application::connection::ConnectionTracker;
use crate::application::state_store::PurchaseStateStore;
use crate::domain::{BillingError, PurchaseToken, SkuState};
use crate::events::{NewPurchaseStream, PurchaseAnnouncer};
use crate::ports::BillingBackend;
use billing_telemetry::{log_purchase_event, ACKNOWLEDGMENTS};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct AckLedger {
    in_flight: HashSet<PurchaseToken>,
    acknowledged: HashSet<PurchaseToken>,
}

/// Result of one acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Acknowledged; covered products still owned advanced and were announced.
    Acknowledged,
    /// The service rejected it; the token stays eligible for the next pass.
    Failed(BillingError),
    /// Another acknowledgment of the same token is in flight, or it already
    /// succeeded.
    Duplicate,
    /// Succeeded under an outdated connection attempt; the result was dropped.
    Discarded,
}

impl AckOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            AckOutcome::Acknowledged => "acknowledged",
            AckOutcome::Failed(_) => "failed",
            AckOutcome::Duplicate => "duplicate",
            AckOutcome::Discarded => "discarded",
        }
    }
}

/// At-most-once-in-flight acknowledgment of purchase tokens.
pub struct AcknowledgmentPipeline {
    backend: Arc<dyn BillingBackend>,
    store: Arc<PurchaseStateStore>,
    connection: Arc<ConnectionTracker>,
    announcer: PurchaseAnnouncer,
    ledger: Mutex<AckLedger>,
}

impl AcknowledgmentPipeline {
    /// Create the pipeline.
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        store: Arc<PurchaseStateStore>,
        connection: Arc<ConnectionTracker>,
    ) -> Self {
        Self {
            backend,
            store,
            connection,
            announcer: PurchaseAnnouncer::new(),
            ledger: Mutex::new(AckLedger::default()),
        }
    }

    /// Receive the products of every purchase acknowledged from now on.
    ///
    /// Announcements are queued per subscriber and never dropped.
    pub fn subscribe_new_purchases(&self) -> NewPurchaseStream {
        self.announcer.subscribe()
    }

    /// Run `f` against the set of tokens acknowledged in this process.
    pub fn with_acknowledged<R>(&self, f: impl FnOnce(&HashSet<PurchaseToken>) -> R) -> R {
        f(&self.ledger.lock().acknowledged)
    }

    /// Was `token` acknowledged in this process?
    pub fn is_acknowledged(&self, token: &PurchaseToken) -> bool {
        self.ledger.lock().acknowledged.contains(token)
    }

    /// Is an acknowledgment of `token` in flight?
    pub fn is_in_flight(&self, token: &PurchaseToken) -> bool {
        self.ledger.lock().in_flight.contains(token)
    }

    /// Number of acknowledgments in flight.
    pub fn in_flight_count(&self) -> usize {
        self.ledger.lock().in_flight.len()
    }

    /// Claim `pending` and acknowledge it on a background task.
    ///
    /// The claim is taken before returning, so concurrent submissions of one
    /// token start exactly one backend call. Returns `None` for duplicates.
    pub fn submit(
        self: &Arc<Self>,
        pending: PendingAcknowledgment,
        attempt: u64,
    ) -> Option<JoinHandle<AckOutcome>> {
        if !self.claim(&pending.token) {
            self.record(&pending.token, &AckOutcome::Duplicate);
            return None;
        }
        let pipeline = Arc::clone(self);
        Some(tokio::spawn(async move {
            pipeline.run(pending, attempt).await
        }))
    }

    /// Claim `pending` and acknowledge it inline.
    pub async fn acknowledge(&self, pending: PendingAcknowledgment, attempt: u64) -> AckOutcome {
        if !self.claim(&pending.token) {
            self.record(&pending.token, &AckOutcome::Duplicate);
            return AckOutcome::Duplicate;
        }
        self.run(pending, attempt).await
    }

    fn claim(&self, token: &PurchaseToken) -> bool {
        let mut ledger = self.ledger.lock();
        if ledger.acknowledged.contains(token) {
            return false;
        }
        ledger.in_flight.insert(token.clone())
    }

    fn release(&self, token: &PurchaseToken) {
        self.ledger.lock().in_flight.remove(token);
    }

    async fn run(&self, pending: PendingAcknowledgment, attempt: u64) -> AckOutcome {
        log_purchase_event!(debug, "Acknowledging purchase", pending.token, attempt = attempt);
        let result = self.backend.acknowledge(&pending.token).await;

        let outcome = match result {
            Err(cause) => {
                self.release(&pending.token);
                AckOutcome::Failed(BillingError::AcknowledgmentFailure {
                    token: pending.token.clone(),
                    cause,
                })
            }
            Ok(()) if !self.connection.is_current(attempt) => {
                self.release(&pending.token);
                AckOutcome::Discarded
            }
            Ok(()) => {
                self.complete(&pending);
                AckOutcome::Acknowledged
            }
        };

        self.record(&pending.token, &outcome);
        outcome
    }

    fn complete(&self, pending: &PendingAcknowledgment) {
        let mut txn = self.store.begin();
        {
            let mut ledger = self.ledger.lock();
            ledger.in_flight.remove(&pending.token);
            ledger.acknowledged.insert(pending.token.clone());
        }

        // A full pass may have reset a product (refund) while the call was
        // in flight; those stay `Unpurchased`.
        let mut owned = Vec::with_capacity(pending.products.len());
        for product_id in &pending.products {
            match txn.get(product_id) {
                Some(SkuState::Unpurchased) | None => {
                    log_purchase_event!(
                        debug,
                        "Product reset while acknowledging, leaving it unpurchased",
                        pending.token,
                        product_id = %product_id
                    );
                }
                Some(_) => {
                    // Products come from the catalog, so this cannot be unknown.
                    let _ = txn.set(product_id, SkuState::PurchasedAcknowledged);
                    owned.push(product_id.clone());
                }
            }
        }
        if !owned.is_empty() {
            self.announcer.announce(&owned);
        }
        txn.finish();
    }

    fn record(&self, token: &PurchaseToken, outcome: &AckOutcome) {
        ACKNOWLEDGMENTS
            .with_label_values(&[outcome.as_label()])
            .inc();
        match outcome {
            AckOutcome::Acknowledged => {
                log_purchase_event!(info, "Purchase acknowledged", token);
            }
            AckOutcome::Failed(e) => {
                log_purchase_event!(
                    warn,
                    "Error acknowledging purchase, will retry on next refresh",
                    token,
                    error = %e
                );
            }
            AckOutcome::Duplicate => {
                log_purchase_event!(debug, "Acknowledgment already in flight or done", token);
            }
            AckOutcome::Discarded => {
                log_purchase_event!(
                    debug,
                    "Dropping acknowledgment result from an outdated connection attempt",
                    token
                );
            }
        }
    }
}

//! # Reconciler
//!
//! Applies a purchase report to the state store in one transaction and
//! hands completed purchases to the acknowledgment pipeline.

use crate::algorithms::plan_reconciliation;
use crate::application::ack_pipeline::AcknowledgmentPipeline;
use crate::application::connection::ConnectionTracker;
use crate::application::state_store::PurchaseStateStore;
use crate::domain::{ProductId, PurchaseRecord, ReconciliationSummary, ReconciliationTrigger};
use billing_telemetry::{log_product_event, RECONCILIATION_PASSES};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, info_span};
use uuid::Uuid;

/// Reconciliation of purchase reports against local state.
pub struct Reconciler {
    store: Arc<PurchaseStateStore>,
    pipeline: Arc<AcknowledgmentPipeline>,
    connection: Arc<ConnectionTracker>,
    auto_acknowledge: bool,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        store: Arc<PurchaseStateStore>,
        pipeline: Arc<AcknowledgmentPipeline>,
        connection: Arc<ConnectionTracker>,
        auto_acknowledge: bool,
    ) -> Self {
        Self {
            store,
            pipeline,
            connection,
            auto_acknowledge,
        }
    }

    /// Apply one purchase report.
    ///
    /// `products_of_interest` not covered by any record are reset to
    /// `Unpurchased`. Reports fetched under an outdated connection attempt
    /// are dropped.
    pub fn apply(
        &self,
        records: &[PurchaseRecord],
        products_of_interest: Option<&BTreeSet<ProductId>>,
        trigger: ReconciliationTrigger,
        attempt: u64,
    ) -> ReconciliationSummary {
        let pass_id = Uuid::new_v4();
        let span = info_span!("reconciliation", pass_id = %pass_id, trigger = trigger.as_label());
        let _entered = span.enter();

        if !self.connection.is_current(attempt) {
            debug!(attempt, "Dropping purchase report from an outdated connection attempt");
            return ReconciliationSummary::discarded(pass_id, trigger);
        }
        RECONCILIATION_PASSES
            .with_label_values(&[trigger.as_label()])
            .inc();

        let (plan, changed) = {
            let mut txn = self.store.begin();
            let plan = self.pipeline.with_acknowledged(|acknowledged| {
                plan_reconciliation(
                    records,
                    self.store.catalog(),
                    acknowledged,
                    products_of_interest,
                )
            });
            for (product_id, state) in &plan.transitions {
                // Planned products are catalog members.
                let _ = txn.set(product_id, *state);
            }
            (plan, txn.finish().len())
        };

        for unknown in &plan.unknown {
            log_product_event!(
                error,
                "Unknown SKU in purchase report, check that it matches the store catalog",
                unknown
            );
        }

        let mut submitted = 0;
        if self.auto_acknowledge {
            for pending in plan.acknowledgments {
                if self.pipeline.submit(pending, attempt).is_some() {
                    submitted += 1;
                }
            }
        } else if !plan.acknowledgments.is_empty() {
            info!(
                pending = plan.acknowledgments.len(),
                "Automatic acknowledgment disabled, leaving purchases unacknowledged"
            );
        }

        let summary = ReconciliationSummary {
            pass_id,
            trigger,
            covered: plan.covered.len(),
            changed,
            unknown: plan.unknown.len(),
            acknowledgments_submitted: submitted,
            discarded: false,
        };
        info!(
            records = records.len(),
            covered = summary.covered,
            changed = summary.changed,
            acknowledgments = summary.acknowledgments_submitted,
            "Reconciliation pass applied"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryBillingBackend;
    use crate::algorithms::PendingAcknowledgment;
    use crate::application::ack_pipeline::AckOutcome;
    use crate::domain::{ProductCatalog, PurchaseState, PurchaseToken, SkuState};
    use crate::events::BillingEventBus;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<InMemoryBillingBackend>,
        store: Arc<PurchaseStateStore>,
        pipeline: Arc<AcknowledgmentPipeline>,
        connection: Arc<ConnectionTracker>,
    }

    impl Fixture {
        fn reconciler(&self, auto_acknowledge: bool) -> Reconciler {
            Reconciler::new(
                self.store.clone(),
                self.pipeline.clone(),
                self.connection.clone(),
                auto_acknowledge,
            )
        }
    }

    fn fixture(records: Vec<PurchaseRecord>) -> Fixture {
        let backend = Arc::new(InMemoryBillingBackend::new());
        backend.set_purchases(records);
        let bus = Arc::new(BillingEventBus::new());
        let catalog = Arc::new(ProductCatalog::new(["p1", "p2"]));
        let store = Arc::new(PurchaseStateStore::new(catalog, bus.clone()));
        let connection = Arc::new(ConnectionTracker::new(bus.clone()));
        let pipeline = Arc::new(AcknowledgmentPipeline::new(
            backend.clone(),
            store.clone(),
            connection.clone(),
        ));
        Fixture {
            backend,
            store,
            pipeline,
            connection,
        }
    }

    fn pid(id: &str) -> ProductId {
        ProductId::new(id)
    }

    fn purchased(token: &str, product: &str, acked: bool) -> PurchaseRecord {
        PurchaseRecord::new(token, vec![pid(product)], PurchaseState::Purchased, acked)
    }

    #[tokio::test]
    async fn test_empty_report_resets_interest() {
        let f = fixture(vec![]);
        f.store.set(&pid("p1"), SkuState::Pending).unwrap();
        let interest = f.store.catalog().as_set().clone();

        let summary = f
            .reconciler(true)
            .apply(&[], Some(&interest), ReconciliationTrigger::Manual, 0);

        assert_eq!(summary.changed, 1);
        assert_eq!(f.store.get(&pid("p1")), Some(SkuState::Unpurchased));
        assert_eq!(f.store.get(&pid("p2")), Some(SkuState::Unpurchased));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_is_acknowledged_in_background() {
        let record = purchased("t1", "p1", false);
        let f = fixture(vec![record.clone()]);

        let summary = f
            .reconciler(true)
            .apply(&[record], None, ReconciliationTrigger::Update, 0);
        assert_eq!(summary.acknowledgments_submitted, 1);
        assert_eq!(f.store.get(&pid("p1")), Some(SkuState::Purchased));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            f.store.get(&pid("p1")),
            Some(SkuState::PurchasedAcknowledged)
        );
    }

    #[tokio::test]
    async fn test_auto_acknowledge_disabled() {
        let record = purchased("t1", "p1", false);
        let f = fixture(vec![record.clone()]);

        let summary = f
            .reconciler(false)
            .apply(&[record], None, ReconciliationTrigger::Update, 0);
        assert_eq!(summary.acknowledgments_submitted, 0);
        assert_eq!(f.backend.total_ack_calls(), 0);
    }

    #[tokio::test]
    async fn test_outdated_report_dropped() {
        let f = fixture(vec![]);
        let stale = f.connection.current_attempt();
        f.connection.begin_attempt().unwrap();

        let summary = f.reconciler(true).apply(
            &[purchased("t1", "p1", true)],
            None,
            ReconciliationTrigger::Connect,
            stale,
        );
        assert!(summary.discarded);
        assert_eq!(f.store.get(&pid("p1")), Some(SkuState::Unpurchased));
    }

    #[tokio::test]
    async fn test_ledger_keeps_acknowledged_state() {
        let record = purchased("t1", "p1", false);
        let f = fixture(vec![record.clone()]);
        let outcome = f
            .pipeline
            .acknowledge(
                PendingAcknowledgment {
                    token: PurchaseToken::new("t1"),
                    products: vec![pid("p1")],
                },
                0,
            )
            .await;
        assert_eq!(outcome, AckOutcome::Acknowledged);

        // A stale report still claims the purchase is unacknowledged.
        let summary = f
            .reconciler(true)
            .apply(&[record], None, ReconciliationTrigger::Update, 0);
        assert_eq!(summary.acknowledgments_submitted, 0);
        assert_eq!(
            f.store.get(&pid("p1")),
            Some(SkuState::PurchasedAcknowledged)
        );
    }

    #[tokio::test]
    async fn test_new_token_starts_new_lifecycle() {
        let f = fixture(vec![]);
        let interest = f.store.catalog().as_set().clone();
        let reconciler = f.reconciler(true);

        reconciler.apply(
            &[purchased("t1", "p1", true)],
            Some(&interest),
            ReconciliationTrigger::Connect,
            0,
        );
        assert_eq!(f.store.get(&pid("p1")), Some(SkuState::PurchasedAcknowledged));

        let repurchase = PurchaseRecord::new("t2", vec![pid("p1")], PurchaseState::Pending, false);
        let summary =
            reconciler.apply(&[repurchase], Some(&interest), ReconciliationTrigger::Manual, 0);
        assert_eq!(summary.changed, 1);
        assert_eq!(f.store.get(&pid("p1")), Some(SkuState::Pending));
    }
}

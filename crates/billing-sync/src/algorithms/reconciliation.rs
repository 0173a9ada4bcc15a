//! # Purchase Reconciliation
//!
//! Maps a purchase report from the billing service onto intended per-product
//! states. Planning is pure; the application layer applies the plan in one
//! transaction so observers never see a product flip twice per batch.

use crate::domain::{
    ProductCatalog, ProductId, PurchaseRecord, PurchaseState, PurchaseToken, SkuState,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A purchase token awaiting acknowledgment, with the known products it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAcknowledgment {
    /// Token to acknowledge.
    pub token: PurchaseToken,
    /// Catalog products covered by the purchase.
    pub products: Vec<ProductId>,
}

/// Result of planning one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Intended state per product, in first-seen order. One entry per product.
    pub transitions: Vec<(ProductId, SkuState)>,
    /// Tokens to acknowledge, once per token.
    pub acknowledgments: Vec<PendingAcknowledgment>,
    /// Catalog products covered by at least one record.
    pub covered: BTreeSet<ProductId>,
    /// Product ids reported by the service but absent from the catalog.
    pub unknown: Vec<ProductId>,
}

impl ReconciliationPlan {
    /// Intended state for `product_id`, if the plan touches it.
    pub fn intended(&self, product_id: &ProductId) -> Option<SkuState> {
        self.transitions
            .iter()
            .find(|(id, _)| id == product_id)
            .map(|(_, state)| *state)
    }
}

/// Local state implied by a single record.
///
/// A token already in the acknowledged ledger has completed its lifecycle:
/// an outdated `Pending` or unacknowledged `Purchased` report for it maps to
/// `PurchasedAcknowledged`. Other tokens map by their reported state, so a
/// new purchase of an owned product starts over from `Pending`.
pub fn map_record_state(record: &PurchaseRecord, acknowledged: &HashSet<PurchaseToken>) -> SkuState {
    let settled = acknowledged.contains(&record.token);
    match record.state {
        PurchaseState::Unspecified => SkuState::Unpurchased,
        PurchaseState::Pending | PurchaseState::Purchased if settled => {
            SkuState::PurchasedAcknowledged
        }
        PurchaseState::Pending => SkuState::Pending,
        PurchaseState::Purchased if record.acknowledged => SkuState::PurchasedAcknowledged,
        PurchaseState::Purchased => SkuState::Purchased,
    }
}

/// Plan a reconciliation pass.
///
/// # Arguments
/// * `records` - Purchases reported by the service (possibly empty)
/// * `catalog` - Static product catalog
/// * `acknowledged` - Tokens already acknowledged in this process
/// * `products_of_interest` - Products to reset to `Unpurchased` when no record covers them
pub fn plan_reconciliation(
    records: &[PurchaseRecord],
    catalog: &ProductCatalog,
    acknowledged: &HashSet<PurchaseToken>,
    products_of_interest: Option<&BTreeSet<ProductId>>,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    let mut positions: HashMap<ProductId, usize> = HashMap::new();
    let mut queued: HashSet<PurchaseToken> = HashSet::new();

    for record in records {
        let intended = map_record_state(record, acknowledged);
        let mut known = Vec::with_capacity(record.products.len());

        for product_id in &record.products {
            if !catalog.contains(product_id) {
                plan.unknown.push(product_id.clone());
                continue;
            }
            known.push(product_id.clone());
            plan.covered.insert(product_id.clone());

            // Last record wins.
            match positions.get(product_id) {
                Some(&index) => plan.transitions[index].1 = intended,
                None => {
                    positions.insert(product_id.clone(), plan.transitions.len());
                    plan.transitions.push((product_id.clone(), intended));
                }
            }
        }

        if intended == SkuState::Purchased && queued.insert(record.token.clone()) {
            plan.acknowledgments.push(PendingAcknowledgment {
                token: record.token.clone(),
                products: known,
            });
        }
    }

    if let Some(interest) = products_of_interest {
        for product_id in interest {
            if catalog.contains(product_id) && !plan.covered.contains(product_id) {
                plan.transitions.push((product_id.clone(), SkuState::Unpurchased));
            }
        }
    }

    plan
}

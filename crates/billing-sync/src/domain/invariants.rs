//! # Domain Invariants
//!
//! Business rules that must always hold true.

use super::entities::{ProductCatalog, SkuStateTable};
use super::value_objects::{SkuState, Timestamp};
use std::time::Duration;

/// Default floor for the reconnect delay.
pub const RECONNECT_FLOOR: Duration = Duration::from_secs(1);

/// Default ceiling for the reconnect delay.
pub const RECONNECT_CEILING: Duration = Duration::from_secs(15 * 60);

/// Default staleness window for catalog details.
pub const CATALOG_STALENESS: Duration = Duration::from_secs(4 * 60 * 60);

/// Invariant: every catalog product has exactly one state entry.
pub fn invariant_table_complete(catalog: &ProductCatalog, table: &SkuStateTable) -> bool {
    table.len() == catalog.len() && catalog.iter().all(|id| table.get(id).is_some())
}

/// Invariant: within one purchase lifecycle (one token), an acknowledged
/// product never moves back to `Purchased` or `Pending`.
///
/// Dropping back to `Unpurchased` is allowed: the product fell out of an
/// "of interest" batch or was refunded. A different token may start a new
/// lifecycle from any state, so this only holds per token.
pub fn invariant_forward_transition(previous: SkuState, next: SkuState) -> bool {
    !(previous == SkuState::PurchasedAcknowledged
        && matches!(next, SkuState::Purchased | SkuState::Pending))
}

/// Invariant: freshness timestamps only move forward.
pub fn invariant_monotonic_freshness(previous: Option<Timestamp>, next: Timestamp) -> bool {
    previous.map_or(true, |prev| next >= prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_complete() {
        let catalog = ProductCatalog::new(["p1", "p2"]);
        let table = SkuStateTable::new(&catalog);
        assert!(invariant_table_complete(&catalog, &table));

        let bigger = ProductCatalog::new(["p1", "p2", "p3"]);
        assert!(!invariant_table_complete(&bigger, &table));
    }

    #[test]
    fn test_forward_transition() {
        use SkuState::*;
        assert!(invariant_forward_transition(Purchased, PurchasedAcknowledged));
        assert!(invariant_forward_transition(PurchasedAcknowledged, Unpurchased));
        assert!(!invariant_forward_transition(PurchasedAcknowledged, Purchased));
        assert!(!invariant_forward_transition(PurchasedAcknowledged, Pending));
    }

    #[test]
    fn test_monotonic_freshness() {
        let t = Timestamp::from_millis(10);
        assert!(invariant_monotonic_freshness(None, t));
        assert!(invariant_monotonic_freshness(Some(t), t));
        assert!(!invariant_monotonic_freshness(
            Some(Timestamp::from_millis(20)),
            t
        ));
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(RECONNECT_FLOOR, Duration::from_secs(1));
        assert_eq!(RECONNECT_CEILING.as_secs(), 900);
        assert_eq!(CATALOG_STALENESS.as_secs(), 14_400);
    }
}

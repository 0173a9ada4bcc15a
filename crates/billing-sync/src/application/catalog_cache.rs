//! # Catalog Cache
//!
//! Product details fetched from the billing service, with freshness
//! timestamps. Entries are `Arc<SkuDetails>` swapped under a short write
//! lock; readers clone the `Arc`.

use crate::application::connection::ConnectionTracker;
use crate::domain::{
    invariant_monotonic_freshness, BillingError, CatalogEntry, ConnectionState, ProductCatalog,
    ProductId, SkuDetails, Timestamp,
};
use crate::ports::{BillingBackend, Clock};
use billing_telemetry::{log_product_event, CATALOG_REFRESHES};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cached catalog details.
pub struct CatalogCache {
    backend: Arc<dyn BillingBackend>,
    clock: Arc<dyn Clock>,
    connection: Arc<ConnectionTracker>,
    catalog: Arc<ProductCatalog>,
    staleness: Duration,
    entries: RwLock<HashMap<ProductId, CatalogEntry>>,
    refreshing: Mutex<HashSet<ProductId>>,
}

impl CatalogCache {
    /// Empty cache.
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        clock: Arc<dyn Clock>,
        connection: Arc<ConnectionTracker>,
        catalog: Arc<ProductCatalog>,
        staleness: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            connection,
            catalog,
            staleness,
            entries: RwLock::new(HashMap::new()),
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// Query the service for `product_ids` and cache what comes back.
    ///
    /// Products missing from the response keep their previous entry. On
    /// failure nothing changes and stale data keeps being served. Results
    /// of an outdated connection attempt are dropped.
    ///
    /// Returns the number of entries updated.
    pub async fn refresh(&self, product_ids: &BTreeSet<ProductId>) -> Result<usize, BillingError> {
        let requested: BTreeSet<ProductId> = product_ids
            .iter()
            .filter(|id| {
                let known = self.catalog.contains(id);
                if !known {
                    error!(product_id = %id, "[billing] Refusing to fetch details of unknown SKU");
                }
                known
            })
            .cloned()
            .collect();
        if requested.is_empty() {
            return Ok(0);
        }

        let attempt = self.connection.current_attempt();
        let response = self.backend.query_catalog(&requested).await;

        let details = match response {
            Ok(details) => details,
            Err(e) => {
                CATALOG_REFRESHES.with_label_values(&["failed"]).inc();
                warn!(
                    code = %e.code,
                    message = %e.message,
                    requested = requested.len(),
                    "[billing] Catalog query failed, serving cached details"
                );
                return Err(BillingError::CatalogFetchFailure(e));
            }
        };

        if !self.connection.is_current(attempt) {
            CATALOG_REFRESHES.with_label_values(&["discarded"]).inc();
            debug!(attempt, "Discarding catalog response from an outdated connection attempt");
            return Ok(0);
        }

        CATALOG_REFRESHES.with_label_values(&["ok"]).inc();
        if details.is_empty() {
            warn!(
                requested = requested.len(),
                "[billing] Catalog query returned no products; are they published in the store console?"
            );
            return Ok(0);
        }

        let now = self.clock.now();
        let mut updated = BTreeSet::new();
        {
            let mut entries = self.entries.write();
            for detail in details {
                if !requested.contains(&detail.product_id) {
                    warn!(product_id = %detail.product_id, "Catalog returned a product that was not requested");
                    continue;
                }
                let previous = entries.get(&detail.product_id).map(|e| e.fetched_at);
                let fetched_at = if invariant_monotonic_freshness(previous, now) {
                    now
                } else {
                    previous.unwrap_or(now)
                };
                updated.insert(detail.product_id.clone());
                entries.insert(
                    detail.product_id.clone(),
                    CatalogEntry {
                        details: Arc::new(detail),
                        fetched_at,
                    },
                );
            }
        }

        for missing in requested.difference(&updated) {
            log_product_event!(info, "Product not returned by catalog query", missing);
        }
        debug!(updated = updated.len(), "Catalog refreshed");
        Ok(updated.len())
    }

    /// Refresh every catalog product.
    pub async fn refresh_all(&self) -> Result<usize, BillingError> {
        self.refresh(self.catalog.as_set()).await
    }

    /// Cached details, if any.
    pub fn get(&self, product_id: &ProductId) -> Option<Arc<SkuDetails>> {
        self.entries
            .read()
            .get(product_id)
            .map(|entry| Arc::clone(&entry.details))
    }

    /// When the details were last fetched.
    pub fn fetched_at(&self, product_id: &ProductId) -> Option<Timestamp> {
        self.entries.read().get(product_id).map(|e| e.fetched_at)
    }

    /// Absent, or older than the staleness window.
    pub fn is_stale(&self, product_id: &ProductId) -> bool {
        match self.fetched_at(product_id) {
            Some(fetched_at) => self.clock.now().saturating_since(fetched_at) >= self.staleness,
            None => true,
        }
    }

    /// Start a background refresh of `product_id` if it is stale.
    ///
    /// At most one such refresh per product runs at a time; other products
    /// are not held back by it. Returns whether one was started.
    pub fn ensure_fresh(self: &Arc<Self>, product_id: &ProductId) -> bool {
        if !self.catalog.contains(product_id) || !self.is_stale(product_id) {
            return false;
        }
        if self.connection.state() != ConnectionState::Connected {
            debug!(product_id = %product_id, "Stale details, waiting for connection");
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(product_id = %product_id, "No runtime to refresh stale details on");
            return false;
        };
        if !self.refreshing.lock().insert(product_id.clone()) {
            return false;
        }

        let cache = Arc::clone(self);
        let product_id = product_id.clone();
        handle.spawn(async move {
            let ids: BTreeSet<ProductId> = [product_id.clone()].into_iter().collect();
            // Failure is logged inside refresh.
            let _ = cache.refresh(&ids).await;
            cache.refreshing.lock().remove(&product_id);
        });
        true
    }

    /// Is an interest-driven refresh of any product running?
    pub fn is_refreshing(&self) -> bool {
        !self.refreshing.lock().is_empty()
    }

    /// Is an interest-driven refresh of `product_id` running?
    pub fn is_refreshing_product(&self, product_id: &ProductId) -> bool {
        self.refreshing.lock().contains(product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryBillingBackend, ManualClock};
    use crate::domain::BackendError;
    use crate::events::BillingEventBus;

    struct Fixture {
        backend: Arc<InMemoryBillingBackend>,
        clock: Arc<ManualClock>,
        connection: Arc<ConnectionTracker>,
        cache: Arc<CatalogCache>,
    }

    fn details(id: &str, price: &str) -> SkuDetails {
        SkuDetails::new(id, id.to_uppercase(), "credits", price)
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBillingBackend::new().with_product(details("p1", "$1")));
        backend.connect().await.unwrap();
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let connection = Arc::new(ConnectionTracker::new(Arc::new(BillingEventBus::new())));
        let attempt = connection.begin_attempt().unwrap();
        connection.mark_connected(attempt);
        let cache = Arc::new(CatalogCache::new(
            backend.clone(),
            clock.clone(),
            connection.clone(),
            Arc::new(ProductCatalog::new(["p1", "p2"])),
            Duration::from_secs(4 * 60 * 60),
        ));
        Fixture {
            backend,
            clock,
            connection,
            cache,
        }
    }

    fn pid(id: &str) -> ProductId {
        ProductId::new(id)
    }

    #[tokio::test]
    async fn test_partial_response_caches_what_came_back() {
        let f = fixture().await;
        let updated = f.cache.refresh_all().await.unwrap();

        assert_eq!(updated, 1);
        assert_eq!(f.cache.get(&pid("p1")).unwrap().price, "$1");
        assert!(f.cache.get(&pid("p2")).is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_data() {
        let f = fixture().await;
        f.cache.refresh_all().await.unwrap();
        f.backend.fail_catalog(Some(BackendError::unavailable("offline")));

        let err = f.cache.refresh_all().await.unwrap_err();
        assert!(matches!(err, BillingError::CatalogFetchFailure(_)));
        assert!(f.cache.get(&pid("p1")).is_some());
    }

    #[tokio::test]
    async fn test_staleness_window() {
        let f = fixture().await;
        f.cache.refresh_all().await.unwrap();
        assert!(!f.cache.is_stale(&pid("p1")));
        assert!(f.cache.is_stale(&pid("p2")));

        f.clock.advance(Duration::from_secs(4 * 60 * 60));
        assert!(f.cache.is_stale(&pid("p1")));
    }

    #[tokio::test]
    async fn test_refresh_updates_timestamp() {
        let f = fixture().await;
        f.cache.refresh_all().await.unwrap();
        f.clock.advance(Duration::from_secs(60));
        f.backend.add_product(details("p1", "$2"));
        f.cache.refresh_all().await.unwrap();

        assert_eq!(f.cache.fetched_at(&pid("p1")), Some(Timestamp::from_millis(60_000)));
        assert_eq!(f.cache.get(&pid("p1")).unwrap().price, "$2");
    }

    #[tokio::test]
    async fn test_empty_response_is_degenerate() {
        let f = fixture().await;
        let ids: BTreeSet<ProductId> = [pid("p2")].into_iter().collect();
        assert_eq!(f.cache.refresh(&ids).await.unwrap(), 0);
        assert!(f.cache.get(&pid("p2")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outdated_attempt_discarded() {
        let f = fixture().await;
        f.backend.set_catalog_delay(Some(Duration::from_secs(5)));

        let cache = Arc::clone(&f.cache);
        let pending = tokio::spawn(async move { cache.refresh_all().await });
        tokio::task::yield_now().await;

        // A new connection attempt begins while the query is in flight.
        f.connection.mark_disconnected(None);
        let attempt = f.connection.begin_attempt().unwrap();
        f.connection.mark_connected(attempt);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(pending.await.unwrap().unwrap(), 0);
        assert!(f.cache.get(&pid("p1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_fresh_single_flight() {
        let f = fixture().await;
        f.backend.set_catalog_delay(Some(Duration::from_secs(1)));

        assert!(f.cache.ensure_fresh(&pid("p1")));
        assert!(!f.cache.ensure_fresh(&pid("p1")));
        assert!(f.cache.is_refreshing());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!f.cache.is_refreshing());
        assert!(f.cache.get(&pid("p1")).is_some());
        assert!(!f.cache.ensure_fresh(&pid("p1")));
        assert_eq!(f.backend.catalog_queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_fresh_does_not_hold_back_other_products() {
        let f = fixture().await;
        f.backend.add_product(details("p2", "$5"));
        f.backend.set_catalog_delay(Some(Duration::from_secs(1)));

        assert!(f.cache.ensure_fresh(&pid("p1")));
        assert!(f.cache.ensure_fresh(&pid("p2")));
        assert!(f.cache.is_refreshing_product(&pid("p2")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.backend.catalog_queries().len(), 2);
        assert_eq!(f.cache.get(&pid("p2")).unwrap().price, "$5");
        assert!(!f.cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_ensure_fresh_ignores_unknown() {
        let f = fixture().await;
        assert!(!f.cache.ensure_fresh(&pid("ghost")));
    }
}

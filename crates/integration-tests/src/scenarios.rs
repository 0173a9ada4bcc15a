//! # Scenario Tests
//!
//! 1. **Partial catalog**: only returned products get details
//! 2. **Purchase then acknowledgment**: `Purchased` advances to
//!    `PurchasedAcknowledged` and the purchase is announced once
//! 3. **Full reconciliation**: products absent from the report reset
//! 4. **Repurchase**: a new token for an owned product starts over at `Pending`
//! 5. **Reconnect backoff**: 1s, 2s, 4s, then back to the floor

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use billing_sync::{
        BackendError, BillingApi, BillingError, ConnectionState, InMemoryBillingBackend,
        PurchaseContext, SkuState,
    };
    use tokio::time::timeout;

    use crate::harness::{details, pending, pid, purchased, Harness};

    #[tokio::test(start_paused = true)]
    async fn test_partial_catalog_response() {
        let h = Harness::new(InMemoryBillingBackend::new().with_product(details("p1", "$1.99")));
        h.connect().await;

        assert_eq!(h.service.get_details(&pid("p1")).unwrap().price, "$1.99");
        assert!(h.service.get_details(&pid("p2")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_is_acknowledged_and_announced() {
        let h = Harness::new(
            InMemoryBillingBackend::new().with_purchase(purchased("t1", &["p1"], false)),
        );
        h.backend.set_ack_delay(Some(Duration::from_millis(100)));
        let mut purchases = h.service.subscribe_new_purchases();

        h.connect().await;
        assert_eq!(h.state("p1"), Some(SkuState::Purchased));

        assert_eq!(purchases.recv().await, Some(vec![pid("p1")]));
        assert_eq!(h.state("p1"), Some(SkuState::PurchasedAcknowledged));
        assert_eq!(h.backend.ack_calls(&"t1".into()), 1);

        // A second refresh sees the purchase acknowledged and announces nothing.
        h.service.refresh_purchases().await.unwrap();
        assert!(timeout(Duration::from_secs(1), purchases.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_reconciliation_resets_absent_products() {
        let h = Harness::new(InMemoryBillingBackend::new().with_purchase(pending("t1", &["p1"])));
        h.connect().await;
        assert_eq!(h.state("p1"), Some(SkuState::Pending));

        h.backend.set_purchases(vec![]);
        let summary = h.service.refresh_purchases().await.unwrap();

        assert_eq!(summary.changed, 1);
        assert_eq!(h.state("p1"), Some(SkuState::Unpurchased));
        assert_eq!(h.state("p2"), Some(SkuState::Unpurchased));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_after_acknowledgment() {
        let h = Harness::new(
            InMemoryBillingBackend::new().with_purchase(purchased("t1", &["p2"], true)),
        );
        h.connect().await;
        assert_eq!(h.state("p2"), Some(SkuState::PurchasedAcknowledged));

        h.backend.set_purchases(vec![]);
        h.service.refresh_purchases().await.unwrap();
        assert_eq!(h.state("p2"), Some(SkuState::Unpurchased));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repurchase_after_acknowledgment() {
        let h = Harness::new(
            InMemoryBillingBackend::new().with_purchase(purchased("t1", &["p1"], true)),
        );
        let mut purchases = h.service.subscribe_new_purchases();
        h.connect().await;
        assert_eq!(h.state("p1"), Some(SkuState::PurchasedAcknowledged));

        // The first purchase was consumed; a second one is pending payment.
        h.backend.set_purchases(vec![pending("t2", &["p1"])]);
        h.service.refresh_purchases().await.unwrap();
        assert_eq!(h.state("p1"), Some(SkuState::Pending));

        h.backend.set_purchases(vec![purchased("t2", &["p1"], false)]);
        h.backend
            .push_purchase_update(Ok(vec![purchased("t2", &["p1"], false)]));
        assert_eq!(purchases.recv().await, Some(vec![pid("p1")]));
        assert_eq!(h.state("p1"), Some(SkuState::PurchasedAcknowledged));
        assert_eq!(h.backend.ack_calls(&"t2".into()), 1);
        assert_eq!(h.backend.ack_calls(&"t1".into()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_purchase_completes_later() {
        let h = Harness::new(InMemoryBillingBackend::new().with_purchase(pending("t1", &["p1"])));
        let changes = h.record_state_changes();
        h.connect().await;

        h.backend.set_purchases(vec![purchased("t1", &["p1"], false)]);
        h.backend.push_purchase_update(Ok(vec![purchased("t1", &["p1"], false)]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.state("p1"), Some(SkuState::PurchasedAcknowledged));
        assert_eq!(
            *changes.lock(),
            vec![
                (pid("p1"), SkuState::Pending),
                (pid("p1"), SkuState::Purchased),
                (pid("p1"), SkuState::PurchasedAcknowledged),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_then_reset() {
        let h = Harness::new(InMemoryBillingBackend::new().with_product(details("p1", "$1")));
        h.backend.script_connect([
            Err(BackendError::unavailable("down")),
            Err(BackendError::unavailable("down")),
            Err(BackendError::unavailable("down")),
        ]);

        assert!(matches!(
            h.service.start().await,
            Err(BillingError::ConnectionFailure(_))
        ));
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(h.service.connection_state(), ConnectionState::Connected);

        let attempts = h.backend.connect_attempts();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );

        // After a success the next reconnect waits only the floor again.
        let dropped_at = tokio::time::Instant::now();
        h.backend.drop_connection();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let attempts = h.backend.connect_attempts();
        assert_eq!(attempts.len(), 5);
        assert_eq!(attempts[4] - dropped_at, Duration::from_secs(1));
        assert_eq!(h.service.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped_at_ceiling() {
        let config = billing_sync::BillingConfig {
            reconnect_floor_ms: 1_000,
            reconnect_ceiling_ms: 3_000,
            ..billing_sync::BillingConfig::for_testing()
        };
        let h = Harness::with_config(config, InMemoryBillingBackend::new());
        h.backend
            .script_connect((0..4).map(|_| Err(BackendError::unavailable("down"))));

        let _ = h.service.start().await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        let attempts = h.backend.connect_attempts();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_flow_lifecycle() {
        let h = Harness::new(InMemoryBillingBackend::new().with_product(details("p1", "$1")));
        h.connect().await;

        h.service
            .request_purchase(PurchaseContext::for_account("acct-1"), &pid("p1"))
            .await
            .unwrap();
        assert!(h.service.is_purchase_flow_in_progress());

        h.backend.cancel_purchase_flow();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.service.is_purchase_flow_in_progress());
        assert_eq!(h.state("p1"), Some(SkuState::Unpurchased));

        let launched = h.backend.launched_flows();
        assert_eq!(launched.len(), 1);
        assert_eq!(
            launched[0].0.obfuscated_account_id.as_deref(),
            Some("acct-1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_catalog_refetched_on_interest() {
        let h = Harness::new(InMemoryBillingBackend::new().with_product(details("p1", "$1")));
        h.connect().await;
        assert_eq!(h.backend.catalog_queries().len(), 1);

        h.clock.advance(Duration::from_secs(3 * 60 * 60));
        h.service.get_details(&pid("p1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.backend.catalog_queries().len(), 1);

        h.clock.advance(Duration::from_secs(60 * 60));
        h.backend.add_product(details("p1", "$2"));
        assert_eq!(h.service.get_details(&pid("p1")).unwrap().price, "$1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.service.get_details(&pid("p1")).unwrap().price, "$2");
        assert_eq!(h.backend.catalog_queries().len(), 2);
    }
}

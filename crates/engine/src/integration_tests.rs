//! Integration tests for the full hold lifecycle.
//!
//! Runs the engine against the in-memory store: creation with TTL, commit
//! (payment success), release (payment failure), expiry (reaper), and the
//! concurrency races the conditional updates exist for.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use stockhold_core::{HoldId, ShopId};

    use crate::config::HoldConfig;
    use crate::error::HoldError;
    use crate::manager::{CreateHoldOptions, HoldManager};
    use crate::reaper::release_expired_holds;
    use crate::store::{HoldStore, InMemoryHoldStore};
    use crate::types::{
        ExtendOutcome, HoldRequest, HoldStatus, InventoryItem, ReleaseOutcome,
    };
    use crate::variant::variant_key;

    const SHOP: &str = "test-shop";
    const SKU: &str = "SKU-001";

    fn shop_id() -> ShopId {
        ShopId::parse(SHOP).unwrap()
    }

    fn red() -> BTreeMap<String, String> {
        [("color".to_string(), "red".to_string())].into()
    }

    fn blue() -> BTreeMap<String, String> {
        [("color".to_string(), "blue".to_string())].into()
    }

    fn red_key() -> String {
        variant_key(SKU, &red())
    }

    fn item(attrs: BTreeMap<String, String>, quantity: i64) -> InventoryItem {
        InventoryItem {
            shop_id: shop_id(),
            sku: SKU.to_string(),
            product_id: "test-product".to_string(),
            variant_key: variant_key(SKU, &attrs),
            variant_attributes: attrs,
            quantity,
        }
    }

    fn request(quantity: u32, attrs: BTreeMap<String, String>) -> HoldRequest {
        HoldRequest {
            sku: SKU.to_string(),
            quantity,
            variant_attributes: attrs,
            variant_key: None,
        }
    }

    fn ttl(secs: u64) -> CreateHoldOptions {
        CreateHoldOptions {
            ttl: Some(Duration::from_secs(secs)),
            reap_limit: Some(0),
        }
    }

    async fn setup(quantity: i64) -> (HoldManager<InMemoryHoldStore>, InMemoryHoldStore) {
        let store = InMemoryHoldStore::new();
        store.put_item(item(red(), quantity)).await;
        (HoldManager::new(store.clone()), store)
    }

    async fn red_quantity(store: &InMemoryHoldStore) -> i64 {
        store
            .item_quantity(&shop_id(), SKU, &red_key())
            .await
            .expect("red item row")
    }

    #[tokio::test]
    async fn create_reduces_available_inventory() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();

        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();

        assert_eq!(created.expires_at, now + chrono::Duration::seconds(600));
        assert_eq!(red_quantity(&store).await, 7);

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Active);
        assert_eq!(hold.shop_id, shop_id());
        assert_eq!(hold.created_at, now);

        let items = store.hold_item_snapshot(created.hold_id).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
        assert_eq!(items[0].variant_key, red_key());
    }

    #[tokio::test]
    async fn create_rejects_insufficient_inventory() {
        let (manager, store) = setup(10).await;

        let err = manager
            .create_hold(SHOP, &[request(15, red())], ttl(600), Utc::now())
            .await
            .unwrap_err();

        match err {
            HoldError::Insufficient { lines } => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].sku, SKU);
                assert_eq!(lines[0].requested, 15);
                assert_eq!(lines[0].available, 10);
            }
            other => panic!("expected insufficient, got {other:?}"),
        }
        // The transaction rolled back; nothing was decremented.
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn create_collects_all_insufficiencies_before_failing() {
        let (manager, store) = setup(10).await;

        // Red is satisfiable, blue does not exist: the error must still name
        // blue, and red's provisional decrement must be rolled back.
        let err = manager
            .create_hold(
                SHOP,
                &[request(3, red()), request(2, blue())],
                ttl(600),
                Utc::now(),
            )
            .await
            .unwrap_err();

        match err {
            HoldError::Insufficient { lines } => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].variant_key, variant_key(SKU, &blue()));
                assert_eq!(lines[0].available, 0);
            }
            other => panic!("expected insufficient, got {other:?}"),
        }
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn create_handles_multiple_variants_in_one_hold() {
        let (manager, store) = setup(10).await;
        store.put_item(item(blue(), 5)).await;

        let created = manager
            .create_hold(
                SHOP,
                &[request(2, red()), request(3, blue())],
                ttl(600),
                Utc::now(),
            )
            .await
            .unwrap();

        let items = store.hold_item_snapshot(created.hold_id).await;
        assert_eq!(items.len(), 2);
        assert_eq!(red_quantity(&store).await, 8);
        assert_eq!(
            store
                .item_quantity(&shop_id(), SKU, &variant_key(SKU, &blue()))
                .await,
            Some(2)
        );
    }

    #[tokio::test]
    async fn create_merges_duplicate_request_lines() {
        let (manager, store) = setup(10).await;

        let created = manager
            .create_hold(
                SHOP,
                &[request(2, red()), request(3, red())],
                ttl(600),
                Utc::now(),
            )
            .await
            .unwrap();

        let items = store.hold_item_snapshot(created.hold_id).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);
        assert_eq!(red_quantity(&store).await, 5);
    }

    #[tokio::test]
    async fn create_rejects_empty_requests() {
        let (manager, _store) = setup(10).await;

        let err = manager
            .create_hold(SHOP, &[], ttl(600), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::MissingItems));

        let err = manager
            .create_hold(SHOP, &[request(0, red())], ttl(600), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::MissingItems));
    }

    #[tokio::test]
    async fn create_rejects_invalid_shop_names() {
        let (manager, _store) = setup(10).await;

        let err = manager
            .create_hold("not a shop!", &[request(1, red())], ttl(600), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::Domain(_)));
    }

    #[tokio::test]
    async fn create_treats_missing_product_id_as_insufficient() {
        let store = InMemoryHoldStore::new();
        let mut orphan = item(red(), 10);
        orphan.product_id = String::new();
        store.put_item(orphan).await;
        let manager = HoldManager::new(store.clone());

        let err = manager
            .create_hold(SHOP, &[request(1, red())], ttl(600), Utc::now())
            .await
            .unwrap_err();

        match err {
            HoldError::Insufficient { lines } => {
                assert_eq!(lines[0].available, 10);
            }
            other => panic!("expected insufficient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();

        for _ in 0..3 {
            manager.commit_hold(SHOP, created.hold_id, now).await.unwrap();
        }

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Committed);
        assert_eq!(hold.committed_at, Some(now));
        // Commit never touches quantities; the decrement stays durable.
        assert_eq!(red_quantity(&store).await, 7);
    }

    #[tokio::test]
    async fn commit_after_release_is_rejected() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();
        manager
            .release_hold(SHOP, created.hold_id, None, now)
            .await
            .unwrap();

        let err = manager
            .commit_hold(SHOP, created.hold_id, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoldError::InvalidState {
                status: HoldStatus::Released
            }
        ));
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn release_restores_inventory() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();
        assert_eq!(red_quantity(&store).await, 7);

        let outcome = manager
            .release_hold(SHOP, created.hold_id, Some("checkout abandoned"), now)
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Released);
        assert_eq!(hold.released_at, Some(now));
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();

        let first = manager
            .release_hold(SHOP, created.hold_id, None, now)
            .await
            .unwrap();
        assert_eq!(first, ReleaseOutcome::Released);
        for _ in 0..2 {
            let again = manager
                .release_hold(SHOP, created.hold_id, None, now)
                .await
                .unwrap();
            assert_eq!(again, ReleaseOutcome::AlreadyReleased);
        }

        // Restored exactly once, regardless of retries.
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn release_after_commit_is_rejected() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();
        manager.commit_hold(SHOP, created.hold_id, now).await.unwrap();

        let err = manager
            .release_hold(SHOP, created.hold_id, None, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoldError::InvalidState {
                status: HoldStatus::Committed
            }
        ));
        assert_eq!(red_quantity(&store).await, 7);
    }

    #[tokio::test]
    async fn release_recreates_a_deleted_counter_row() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();

        // Provisioning is external; the row can disappear under an open hold.
        store.remove_item(&shop_id(), SKU, &red_key()).await;

        manager
            .release_hold(SHOP, created.hold_id, None, now)
            .await
            .unwrap();
        assert_eq!(red_quantity(&store).await, 3);
    }

    #[tokio::test]
    async fn unknown_hold_and_foreign_shop_are_not_found() {
        let (manager, store) = setup(10).await;
        let now = Utc::now();

        let err = manager
            .commit_hold(SHOP, HoldId::new(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::NotFound));

        let created = manager
            .create_hold(SHOP, &[request(1, red())], ttl(600), now)
            .await
            .unwrap();
        let err = manager
            .commit_hold("other-shop", created.hold_id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::NotFound));

        // The probe must not have resolved the hold.
        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Active);
    }

    async fn reap(store: &InMemoryHoldStore, now: DateTime<Utc>, limit: u32) {
        let mut tx = store.begin().await.unwrap();
        release_expired_holds(tx.as_mut(), &shop_id(), now, limit)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn reaper_expires_overdue_holds_and_restores_quantity() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(60), t0)
            .await
            .unwrap();

        let later = t0 + chrono::Duration::seconds(61);
        reap(&store, later, 100).await;

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Expired);
        assert_eq!(hold.expired_at, Some(later));
        assert_eq!(red_quantity(&store).await, 10);
    }

    #[tokio::test]
    async fn reaper_leaves_unexpired_holds_alone() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(3600), t0)
            .await
            .unwrap();

        reap(&store, t0, 100).await;

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Active);
        assert_eq!(red_quantity(&store).await, 7);
    }

    #[tokio::test]
    async fn reaper_respects_its_limit() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        let mut hold_ids = Vec::new();
        for _ in 0..3 {
            let created = manager
                .create_hold(SHOP, &[request(1, red())], ttl(60), t0)
                .await
                .unwrap();
            hold_ids.push(created.hold_id);
        }
        assert_eq!(red_quantity(&store).await, 7);

        reap(&store, t0 + chrono::Duration::seconds(120), 2).await;

        let mut expired = 0;
        for hold_id in &hold_ids {
            if store.hold_snapshot(*hold_id).await.unwrap().status == HoldStatus::Expired {
                expired += 1;
            }
        }
        assert_eq!(expired, 2);
        assert_eq!(red_quantity(&store).await, 9);
    }

    #[tokio::test]
    async fn create_reaps_inline_to_free_capacity() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        // Exhaust the stock with a hold that expires after the 30s TTL floor.
        let first = manager
            .create_hold(SHOP, &[request(10, red())], ttl(1), t0)
            .await
            .unwrap();
        assert_eq!(first.expires_at, t0 + chrono::Duration::seconds(30));
        assert_eq!(red_quantity(&store).await, 0);

        // Default options reap inline, so the expired hold's capacity
        // satisfies this very request.
        let later = t0 + chrono::Duration::seconds(31);
        let second = manager
            .create_hold(
                SHOP,
                &[request(10, red())],
                CreateHoldOptions {
                    ttl: Some(Duration::from_secs(600)),
                    reap_limit: None,
                },
                later,
            )
            .await
            .unwrap();

        let expired = store.hold_snapshot(first.hold_id).await.unwrap();
        assert_eq!(expired.status, HoldStatus::Expired);
        let active = store.hold_snapshot(second.hold_id).await.unwrap();
        assert_eq!(active.status, HoldStatus::Active);
        assert_eq!(red_quantity(&store).await, 0);
    }

    #[tokio::test]
    async fn create_without_inline_reap_sees_exhausted_stock() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        manager
            .create_hold(SHOP, &[request(10, red())], ttl(1), t0)
            .await
            .unwrap();

        let later = t0 + chrono::Duration::seconds(31);
        let err = manager
            .create_hold(SHOP, &[request(10, red())], ttl(600), later)
            .await
            .unwrap_err();
        match err {
            HoldError::Insufficient { lines } => assert_eq!(lines[0].available, 0),
            other => panic!("expected insufficient, got {other:?}"),
        }
        assert_eq!(red_quantity(&store).await, 0);
    }

    #[tokio::test]
    async fn extend_pushes_the_deadline_forward() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), t0)
            .await
            .unwrap();

        let outcome = manager
            .extend_hold(
                SHOP,
                created.hold_id,
                Some(Duration::from_secs(600)),
                t0 + chrono::Duration::seconds(60),
            )
            .await
            .unwrap();

        // max(current expiry, now) + ttl: t0+600 is later than t0+60.
        let expected = t0 + chrono::Duration::seconds(1200);
        assert_eq!(outcome, ExtendOutcome::Extended { expires_at: expected });
        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert_eq!(hold.expires_at, expected);
    }

    #[tokio::test]
    async fn extend_never_shortens_the_deadline() {
        let (manager, store) = setup(10).await;
        let t0 = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(3600), t0)
            .await
            .unwrap();

        let outcome = manager
            .extend_hold(SHOP, created.hold_id, Some(Duration::from_secs(30)), t0)
            .await
            .unwrap();

        let hold = store.hold_snapshot(created.hold_id).await.unwrap();
        assert!(hold.expires_at >= created.expires_at);
        assert_eq!(
            outcome,
            ExtendOutcome::Extended {
                expires_at: created.expires_at + chrono::Duration::seconds(30)
            }
        );
    }

    #[tokio::test]
    async fn extend_reports_terminal_states_instead_of_failing() {
        let (manager, _store) = setup(10).await;
        let now = Utc::now();
        let created = manager
            .create_hold(SHOP, &[request(3, red())], ttl(600), now)
            .await
            .unwrap();
        manager.commit_hold(SHOP, created.hold_id, now).await.unwrap();

        let outcome = manager
            .extend_hold(SHOP, created.hold_id, None, now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExtendOutcome::NotActive {
                status: HoldStatus::Committed
            }
        );
    }

    #[tokio::test]
    async fn concurrent_creates_cannot_oversell() {
        let (manager, store) = setup(10).await;
        let manager = Arc::new(manager);
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .create_hold(SHOP, &[request(6, red())], ttl(600), now)
                    .await
            }));
        }

        let mut successes = 0;
        let mut reported_available = None;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(HoldError::Insufficient { lines }) => {
                    reported_available = Some(lines[0].available);
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(reported_available, Some(4));
        assert_eq!(red_quantity(&store).await, 4);
    }

    #[tokio::test]
    async fn many_concurrent_claims_never_exceed_initial_stock() {
        let (manager, store) = setup(25).await;
        let manager = Arc::new(manager);
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .create_hold(SHOP, &[request(4, red())], ttl(600), now)
                    .await
            }));
        }

        let mut reserved = 0i64;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                reserved += 4;
            }
        }

        assert!(reserved <= 25);
        assert_eq!(reserved, 24); // floor(25 / 4) claims of 4 each
        assert_eq!(red_quantity(&store).await, 25 - reserved);
    }

    #[tokio::test]
    async fn contended_store_surfaces_busy_with_retry_guidance() {
        let store = InMemoryHoldStore::with_acquire_timeout(Duration::from_millis(10));
        store.put_item(item(red(), 10)).await;
        let manager = HoldManager::new(store.clone());

        // Hold a transaction open so create cannot begin in time.
        let blocker = store.begin().await.unwrap();

        let err = manager
            .create_hold(SHOP, &[request(1, red())], ttl(600), Utc::now())
            .await
            .unwrap_err();
        match err {
            HoldError::Busy { retry_after } => {
                assert_eq!(retry_after, HoldConfig::default().retry_after);
            }
            other => panic!("expected busy, got {other:?}"),
        }

        blocker.rollback().await.unwrap();
    }
}

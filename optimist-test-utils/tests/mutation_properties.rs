use optimist_test_utils::assertions::{assert_all_committed, assert_settled};
use optimist_test_utils::fixtures::{in_memory_cache, manual_cache, products_key, seed_products};
use optimist_test_utils::generators::{
    arb_committed_products, arb_product, arb_products, arb_write_error,
};
use optimist_test_utils::{
    CacheConfig, CacheKey, CachedItem, ConflictError, ConflictPolicy, EntryStatus, FetchOutcome, Product,
    TransportError, ValidationError,
};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime creation should succeed")
}

fn queue_config() -> CacheConfig {
    CacheConfig::new().with_conflict_policy(ConflictPolicy::Queue)
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_commit_into_empty_cache() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();

    let pending = cache.mutate(&key, Product::named("A")).await.unwrap();
    assert_eq!(cache.get(&key).value.as_slice(), &[Product::named("A")]);

    let write = writes.next().await.unwrap();
    assert_eq!(write.item, Product::named("A"));
    assert!(write.ok(Product::named("A").with_id(1)));

    let fetch = fetches.next().await.unwrap();
    assert!(fetch.ok(vec![Product::named("A").with_id(1)]));

    let report = pending.settled().await.unwrap();
    assert_eq!(report.canonical(), Some(&Product::named("A").with_id(1)));
    assert_eq!(report.reconcile, Ok(1));
    assert_settled(cache.store(), &key, &[Product::named("A").with_id(1)]);
}

#[tokio::test]
async fn scenario_failed_write_leaves_cache_unchanged() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();
    let before = vec![Product::named("A").with_id(1)];
    cache.store().set_value(&key, before.clone());

    let pending = cache.mutate(&key, Product::named("B")).await.unwrap();
    assert_eq!(cache.get(&key).value.len(), 2);

    let write = writes.next().await.unwrap();
    assert!(write.fail(TransportError::Status {
        status: 500,
        message: "boom".to_string(),
    }));

    // Rolled back before the reconcile fetch resolves.
    let fetch = fetches.next().await.unwrap();
    assert_eq!(cache.get(&key).value.as_slice(), before.as_slice());
    assert!(fetch.ok(before.clone()));

    let report = pending.settled().await.unwrap();
    assert!(report.is_rolled_back());
    assert_settled(cache.store(), &key, &before);
}

#[tokio::test]
async fn scenario_in_memory_round_trip() {
    let (cache, server) = in_memory_cache(seed_products(), CacheConfig::default());
    let key = products_key();
    cache.fetch(&key).await.unwrap();

    let report = cache
        .mutate(&key, Product::named("Mug").with_price("7.00"))
        .await
        .unwrap()
        .settled()
        .await
        .unwrap();

    assert!(report.is_committed());
    assert_settled(cache.store(), &key, &server.snapshot());
    assert_all_committed(&cache.get(&key).value);
    assert_eq!(cache.get(&key).value.len(), 3);
}

// ============================================================================
// NO LOST OVERWRITE
// ============================================================================

#[tokio::test]
async fn fetch_completing_during_mutation_is_discarded() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();
    cache.store().set_value(&key, vec![Product::named("A").with_id(1)]);

    let background = tokio::spawn({
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.fetch(&key).await }
    });
    let stale = fetches.next().await.unwrap();

    let pending = cache.mutate(&key, Product::named("B")).await.unwrap();
    assert!(stale.ok(vec![Product::named("A").with_id(1)]));
    assert_eq!(background.await.unwrap(), Ok(FetchOutcome::Discarded));

    let value = cache.get(&key).value;
    assert_eq!(value.len(), 2);
    assert!(value[1].is_tentative());

    assert!(writes.next().await.unwrap().ok(Product::named("B").with_id(2)));
    let server = vec![
        Product::named("A").with_id(1),
        Product::named("B").with_id(2),
    ];
    assert!(fetches.next().await.unwrap().ok(server.clone()));
    pending.settled().await.unwrap();
    assert_settled(cache.store(), &key, &server);
}

#[tokio::test]
async fn fetch_completing_before_mutation_is_kept_under_tentative_item() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();

    let background = tokio::spawn({
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.fetch(&key).await }
    });
    assert!(fetches
        .next()
        .await
        .unwrap()
        .ok(vec![Product::named("A").with_id(1)]));
    assert_eq!(background.await.unwrap(), Ok(FetchOutcome::Applied(1)));

    let pending = cache.mutate(&key, Product::named("B")).await.unwrap();
    assert_eq!(
        cache.get(&key).value.as_slice(),
        &[Product::named("A").with_id(1), Product::named("B")]
    );

    assert!(writes.next().await.unwrap().fail(ValidationError::Rejected {
        reason: "duplicate".to_string(),
    }));
    assert!(fetches.next().await.unwrap().fail(TransportError::Timeout));
    let report = pending.settled().await.unwrap();
    assert!(report.is_rolled_back());
    assert!(!report.is_reconciled());
    assert_settled(cache.store(), &key, &[Product::named("A").with_id(1)]);
}

#[tokio::test]
async fn fetch_started_during_mutation_is_suppressed() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();

    let pending = cache.mutate(&key, Product::named("A")).await.unwrap();
    assert_eq!(cache.fetch(&key).await, Ok(FetchOutcome::Suppressed));
    assert!(fetches.try_next().is_none());

    assert!(writes.next().await.unwrap().ok(Product::named("A").with_id(1)));
    assert!(fetches
        .next()
        .await
        .unwrap()
        .ok(vec![Product::named("A").with_id(1)]));
    pending.settled().await.unwrap();

    assert!(!cache.gate().is_suppressed(&key));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn optimistic_value_wins_over_stale_fetch(
        prior in arb_committed_products(6),
        stale in arb_committed_products(6),
        item in arb_product(),
        fetch_first in any::<bool>(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
            let key = products_key();
            cache.store().set_value(&key, prior.clone());

            let background = tokio::spawn({
                let cache = cache.clone();
                let key = key.clone();
                async move { cache.fetch(&key).await }
            });
            let mut in_flight = Some((fetches.next().await.unwrap(), background));

            let mut expected = prior.clone();
            if fetch_first {
                if let Some((call, task)) = in_flight.take() {
                    call.ok(stale.clone());
                    assert_eq!(task.await.unwrap(), Ok(FetchOutcome::Applied(stale.len())));
                }
                expected = stale.clone();
            }

            let pending = cache.mutate(&key, item.clone()).await.unwrap();
            expected.push(item.clone());

            if let Some((call, task)) = in_flight.take() {
                call.ok(stale.clone());
                assert_eq!(task.await.unwrap(), Ok(FetchOutcome::Discarded));
            }
            assert_eq!(cache.get(&key).value.as_slice(), expected.as_slice());

            writes.next().await.unwrap().fail(TransportError::Timeout);
            fetches.next().await.unwrap().fail(TransportError::Timeout);
            pending.settled().await.unwrap();
        });
    }

    #[test]
    fn rollback_restores_exact_snapshot(
        prior in arb_products(8),
        item in arb_product(),
        err in arb_write_error(),
    ) {
        let rt = runtime();
        let (restored, final_value, status) = rt.block_on(async {
            let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
            let key = products_key();
            cache.store().set_value(&key, prior.clone());

            let pending = cache.mutate(&key, item).await.unwrap();
            writes.next().await.unwrap().fail(err);

            let reconcile = fetches.next().await.unwrap();
            let restored = cache.get(&key).value.to_vec();
            reconcile.fail(TransportError::Unreachable { reason: "down".to_string() });

            let report = pending.settled().await.unwrap();
            assert!(report.is_rolled_back());
            let entry = cache.get(&key);
            (restored, entry.value.to_vec(), entry.status)
        });
        prop_assert_eq!(&restored, &prior);
        prop_assert_eq!(&final_value, &prior);
        prop_assert_eq!(status, EntryStatus::Idle);
    }

    #[test]
    fn reconcile_leaves_exactly_what_the_server_returned(
        prior in arb_committed_products(6),
        server in arb_committed_products(8),
        item in arb_product(),
        commit in any::<bool>(),
    ) {
        let rt = runtime();
        let final_value = rt.block_on(async {
            let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
            let key = products_key();
            cache.store().set_value(&key, prior);

            let pending = cache.mutate(&key, item.clone()).await.unwrap();
            let write = writes.next().await.unwrap();
            if commit {
                write.ok(item.with_id(1_000));
            } else {
                write.fail(TransportError::Timeout);
            }
            fetches.next().await.unwrap().ok(server.clone());
            pending.settled().await.unwrap();
            cache.get(&key).value.to_vec()
        });
        prop_assert_eq!(&final_value, &server);
        prop_assert!(final_value.iter().all(|p| !p.is_tentative()));
    }

    #[test]
    fn repeated_suppression_releases_fully(times in 1usize..8) {
        let rt = runtime();
        let outcome = rt.block_on(async {
            let (cache, server) = in_memory_cache(seed_products(), CacheConfig::default());
            let key = products_key();
            for _ in 0..times {
                cache.gate().suppress(&key);
            }
            assert_eq!(cache.fetch(&key).await, Ok(FetchOutcome::Suppressed));
            cache.gate().release(&key);
            let outcome = cache.fetch(&key).await;
            assert_eq!(server.fetch_count(), 1);
            outcome
        });
        prop_assert_eq!(outcome, Ok(FetchOutcome::Applied(2)));
    }
}

// ============================================================================
// CONFLICT POLICY
// ============================================================================

#[tokio::test]
async fn reject_policy_leaves_pending_mutation_untouched() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();

    let pending = cache.mutate(&key, Product::named("A")).await.unwrap();
    let err = cache.mutate(&key, Product::named("B")).await.unwrap_err();
    assert_eq!(err, ConflictError::MutationInProgress { key: key.clone() });

    let entry = cache.get(&key);
    assert_eq!(entry.value.as_slice(), &[Product::named("A")]);
    assert_eq!(entry.status, EntryStatus::Mutating);
    assert_eq!(entry.snapshot.as_deref().map(Vec::len), Some(0));

    assert!(writes.next().await.unwrap().ok(Product::named("A").with_id(1)));
    assert!(fetches
        .next()
        .await
        .unwrap()
        .ok(vec![Product::named("A").with_id(1)]));
    pending.settled().await.unwrap();
    assert!(writes.try_next().is_none());
}

#[tokio::test]
async fn queue_policy_runs_mutations_in_order() {
    let (cache, mut fetches, mut writes) = manual_cache(queue_config());
    let key = products_key();

    let first = cache.mutate(&key, Product::named("A")).await.unwrap();
    let second = tokio::spawn({
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.mutate(&key, Product::named("B")).await }
    });

    let write = writes.next().await.unwrap();
    assert_eq!(write.item, Product::named("A"));
    // The queued mutation has not touched the collection yet.
    assert_eq!(cache.get(&key).value.as_slice(), &[Product::named("A")]);
    assert!(write.ok(Product::named("A").with_id(1)));
    assert!(fetches
        .next()
        .await
        .unwrap()
        .ok(vec![Product::named("A").with_id(1)]));
    first.settled().await.unwrap();

    let second = second.await.unwrap().unwrap();
    let write = writes.next().await.unwrap();
    assert_eq!(write.item, Product::named("B"));
    assert_eq!(
        cache.get(&key).value.as_slice(),
        &[Product::named("A").with_id(1), Product::named("B")]
    );
    assert!(write.ok(Product::named("B").with_id(2)));

    let server = vec![
        Product::named("A").with_id(1),
        Product::named("B").with_id(2),
    ];
    assert!(fetches.next().await.unwrap().ok(server.clone()));
    second.settled().await.unwrap();
    assert_settled(cache.store(), &key, &server);
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

#[tokio::test]
async fn subscriber_sees_tentative_then_reconciled_value() {
    let (cache, server) = in_memory_cache(seed_products(), CacheConfig::default());
    let key = products_key();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = cache.subscribe(&key, move |products: &[Product]| {
        sink.lock().unwrap().push(products.to_vec());
    });
    cache.ensure(&key).await.unwrap();

    cache
        .mutate(&key, Product::named("Mug"))
        .await
        .unwrap()
        .settled()
        .await
        .unwrap();

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], seed_products());
        assert!(seen[1].last().unwrap().is_tentative());
        assert_eq!(seen[2], server.snapshot());
    }

    drop(subscription);
    assert!(!cache.store().contains(&key));
}

#[tokio::test]
async fn many_keys_leave_no_state_behind() {
    let (cache, server) = in_memory_cache(seed_products(), CacheConfig::default());

    for n in 0..100 {
        let key = CacheKey::new(format!("products-{n}"));
        server.set_fail_writes(n % 3 == 0);
        let subscription = cache.subscribe(&key, |_: &[Product]| {});
        cache.ensure(&key).await.unwrap();
        cache
            .mutate(&key, Product::named("Mug"))
            .await
            .unwrap()
            .settled()
            .await
            .unwrap();
        subscription.unsubscribe();
    }

    assert!(cache.store().is_empty());
    assert!(cache.gate().is_empty());
    assert_eq!(cache.coordinator().lock_count(), 0);
}

#[tokio::test]
async fn entry_left_mid_mutation_is_discarded_once_settled() {
    let (cache, mut fetches, mut writes) = manual_cache(CacheConfig::default());
    let key = products_key();

    let subscription = cache.subscribe(&key, |_: &[Product]| {});
    let pending = cache.mutate(&key, Product::named("A")).await.unwrap();
    drop(subscription);
    assert_eq!(cache.get(&key).status, EntryStatus::Mutating);

    writes.next().await.unwrap().ok(Product::named("A").with_id(1));
    fetches.next().await.unwrap().ok(vec![Product::named("A").with_id(1)]);
    pending.settled().await.unwrap();

    assert!(!cache.store().contains(&key));
}

#[tokio::test]
async fn entry_kept_after_unsubscribe_when_discard_disabled() {
    let (cache, _server) = in_memory_cache(
        seed_products(),
        CacheConfig::new().with_discard_unsubscribed(false),
    );
    let key = products_key();

    let subscription = cache.subscribe(&key, |_: &[Product]| {});
    cache.ensure(&key).await.unwrap();
    subscription.unsubscribe();

    assert!(cache.store().contains(&key));
    assert_eq!(cache.ensure(&key).await, Ok(FetchOutcome::Cached));
}

//! Integration tests for the shared cache across process identities
//!
//! Tests verify:
//! - Load/save/destroy semantics and TTL accounting
//! - Lock ownership, reentrancy and bounded waiting
//! - Lock gating of mutations and the no-partial-write guarantee
//! - Dump/clear/restore of the whole namespace
//! - Propagation of backend failures

use std::sync::Arc;
use std::time::Duration;

use keyhold_core::{LockCheck, LockOutcome, UnlockOutcome};
use keyhold_storage::{Cache, InMemoryKeyValueStore, KeyValueStore, LoadOptions};
use keyhold_test_utils::assertions::{assert_locked, assert_not_found, assert_store_error};
use keyhold_test_utils::faults::FlakyStore;
use keyhold_test_utils::fixtures::{test_config, SharedStore, TEST_CACHE_PREFIX};
use serde_json::{json, Value};

fn flaky_cache(
    id: &str,
) -> (
    Arc<FlakyStore<InMemoryKeyValueStore>>,
    Cache<FlakyStore<InMemoryKeyValueStore>>,
) {
    let store = Arc::new(FlakyStore::new(InMemoryKeyValueStore::new()));
    let cache = Cache::new(Arc::clone(&store), test_config(id)).expect("cache");
    (store, cache)
}

// ============================================================================
// CACHE READ/WRITE
// ============================================================================

#[tokio::test]
async fn test_save_then_load_returns_value() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();

    a.save("user:1", &json!({"name": "ada", "tags": ["x", "y"]}), None)
        .await
        .expect("save");

    let hit = b
        .load::<Value>("user:1", LoadOptions::default())
        .await
        .expect("load from another instance");
    assert_eq!(hit.value, json!({"name": "ada", "tags": ["x", "y"]}));
}

#[tokio::test(start_paused = true)]
async fn test_ttl_entry_readable_until_expiry() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");

    cache
        .save("k", &"v", Some(Duration::from_millis(1000)))
        .await
        .expect("save");

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(cache.load::<String>("k", LoadOptions::default()).await.is_ok());

    tokio::time::advance(Duration::from_millis(2)).await;
    assert_not_found(&cache.load::<String>("k", LoadOptions::default()).await);
}

#[tokio::test]
async fn test_sub_second_ttl_rounds_up_to_one_second() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");

    cache
        .save("k", &1, Some(Duration::from_millis(1)))
        .await
        .expect("save");
    let ttl = shared
        .store
        .ttl(&format!("{}k", TEST_CACHE_PREFIX))
        .expect("ttl")
        .expect("has ttl");
    assert!(ttl > Duration::from_millis(900));
    assert!(ttl <= Duration::from_secs(1));
}

#[tokio::test]
async fn test_destroy_missing_key_is_not_an_error() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");
    assert!(!cache.destroy("never-written").await.expect("destroy"));
}

#[tokio::test]
async fn test_destroy_then_load_is_not_found() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");
    cache.save("k", &1, None).await.expect("save");
    assert!(cache.destroy("k").await.expect("destroy"));
    assert_not_found(&cache.load::<i32>("k", LoadOptions::default()).await);
}

#[tokio::test]
async fn test_type_mismatch_reads_as_not_found() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");
    cache.save("k", &"text", None).await.expect("save");
    assert_not_found(&cache.load::<u64>("k", LoadOptions::default()).await);
}

// ============================================================================
// LOCKING
// ============================================================================

#[tokio::test]
async fn test_lock_is_reentrant_and_exclusive() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();

    assert_eq!(a.lock("k", None).await.expect("lock"), LockOutcome::Acquired);
    assert_eq!(a.lock("k", None).await.expect("relock"), LockOutcome::Acquired);
    assert_eq!(b.lock("k", None).await.expect("lock"), LockOutcome::Denied);
    assert_eq!(b.check_lock("k", None).await.expect("check"), LockCheck::Denied);
    assert_eq!(a.check_lock("k", None).await.expect("check"), LockCheck::Allowed);
}

#[tokio::test]
async fn test_unlock_only_by_owner() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();

    a.lock("k", None).await.expect("lock");
    assert_eq!(b.unlock("k").await.expect("unlock"), UnlockOutcome::Denied);
    assert_eq!(b.holder("k").await.expect("holder"), Some("a".to_string()));

    assert_eq!(a.unlock("k").await.expect("unlock"), UnlockOutcome::Released);
    assert_eq!(b.check_lock("k", None).await.expect("check"), LockCheck::Allowed);
}

#[tokio::test(start_paused = true)]
async fn test_check_lock_gives_up_after_max_wait() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();
    a.lock("k", Some(Duration::from_secs(30))).await.expect("lock");

    let wait = Duration::from_millis(500);
    let started = tokio::time::Instant::now();
    let check = b.check_lock("k", Some(wait)).await.expect("check");
    let elapsed = started.elapsed();

    assert_eq!(check, LockCheck::Denied);
    assert!(elapsed >= wait);
    assert!(elapsed <= wait + b.config().lock_poll.interval);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_proceeds_after_release() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();
    a.lock("k", None).await.expect("lock");

    let waiter = tokio::spawn(async move { b.check_lock("k", Some(Duration::from_secs(5))).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.unlock("k").await.expect("unlock"), UnlockOutcome::Released);

    let check = waiter.await.expect("join").expect("check");
    assert_eq!(check, LockCheck::Allowed);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_lock_expires() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();
    a.lock("k", Some(Duration::from_millis(1500))).await.expect("lock");

    tokio::time::advance(Duration::from_millis(1900)).await;
    assert_eq!(b.check_lock("k", None).await.expect("check"), LockCheck::Denied);

    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(b.lock("k", None).await.expect("lock"), LockOutcome::Acquired);
}

#[tokio::test]
async fn test_locked_save_leaves_prior_state() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();

    a.save("x", &json!({"n": 0}), None).await.expect("save");
    b.lock("x", None).await.expect("lock");

    assert_locked(&a.save("x", &json!({"n": 1}), Some(Duration::from_millis(5000))).await);
    assert_locked(&a.destroy("x").await);

    let hit = a.load::<Value>("x", LoadOptions::default()).await.expect("load");
    assert_eq!(hit.value, json!({"n": 0}));
    assert_eq!(hit.expires_at, None);
}

#[tokio::test]
async fn test_locking_disabled_ignores_foreign_locks() {
    let shared = SharedStore::new();
    let b = shared.instance("b");
    let a = shared.instance_with(test_config("a").with_locking(false));

    b.lock("x", None).await.expect("lock");
    a.save("x", &1, None).await.expect("save");
    assert!(a.destroy("x").await.expect("destroy"));
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[tokio::test]
async fn test_dump_clear_restore_scenario() {
    let shared = SharedStore::new();
    let cache = shared.instance("a");

    cache.save("a", &1, None).await.expect("save");
    cache
        .save("b", &2, Some(Duration::from_secs(60)))
        .await
        .expect("save");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("snapshot.json");
    assert_eq!(cache.dump_write(&path).await.expect("dump"), 2);

    assert_eq!(cache.clear().await.expect("clear"), 2);
    assert_not_found(&cache.load::<i32>("a", LoadOptions::default()).await);

    assert_eq!(cache.dump_read(&path).await.expect("restore"), 2);
    let a = cache.load::<i32>("a", LoadOptions::default()).await.expect("a");
    let b = cache.load::<i32>("b", LoadOptions::default()).await.expect("b");
    assert_eq!((a.value, b.value), (1, 2));

    let ttl = shared
        .store
        .ttl(&format!("{}b", TEST_CACHE_PREFIX))
        .expect("ttl")
        .expect("ttl restored");
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(58));
    assert_eq!(
        shared.store.ttl(&format!("{}a", TEST_CACHE_PREFIX)).expect("ttl"),
        None
    );
}

#[tokio::test]
async fn test_snapshot_ignores_locks() {
    let shared = SharedStore::new();
    let (a, b) = shared.pair();
    a.save("k", &1, None).await.expect("save");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("snapshot.json");
    a.dump_write(&path).await.expect("dump");

    b.lock("k", None).await.expect("lock");
    assert_eq!(a.dump_read(&path).await.expect("restore"), 1);
    assert_eq!(a.holder("k").await.expect("holder"), Some("b".to_string()));
}

// ============================================================================
// BACKEND FAILURES
// ============================================================================

#[tokio::test]
async fn test_lock_fails_when_lease_cannot_be_applied() {
    let (store, cache) = flaky_cache("a");
    store.fail("EXPIRE");

    assert_store_error(&cache.lock("k", None).await, "EXPIRE");
    // The entry stays behind without a lease.
    assert_eq!(cache.holder("k").await.expect("holder"), Some("a".to_string()));
}

#[tokio::test]
async fn test_load_propagates_read_failure() {
    let (store, cache) = flaky_cache("a");
    cache.save("k", &1, None).await.expect("save");
    store.fail("GET");
    assert_store_error(&cache.load::<i32>("k", LoadOptions::default()).await, "GET");
}

#[tokio::test]
async fn test_failed_lock_check_reports_locked() {
    let (store, cache) = flaky_cache("a");
    store.fail("GET");
    assert_locked(&cache.save("k", &1, None).await);
    assert_eq!(store.calls("SET"), 0);
}

#[tokio::test]
async fn test_save_without_atomic_ttl_issues_expire() {
    let store = Arc::new(FlakyStore::new(InMemoryKeyValueStore::new()).without_set_ttl());
    let cache = Cache::new(Arc::clone(&store), test_config("a")).expect("cache");

    cache
        .save("k", &1, Some(Duration::from_secs(3)))
        .await
        .expect("save");
    assert_eq!(store.calls("EXPIRE"), 1);
    let ttl = store
        .inner()
        .ttl(&format!("{}k", TEST_CACHE_PREFIX))
        .expect("ttl");
    assert!(ttl.is_some());

    store.fail("EXPIRE");
    assert_store_error(&cache.save("k", &2, Some(Duration::from_secs(3))).await, "EXPIRE");
}

#[tokio::test]
async fn test_clear_reports_failure_after_every_delete_ran() {
    let (store, cache) = flaky_cache("a");
    for key in ["a", "b", "c"] {
        cache.save(key, &1, None).await.expect("save");
    }
    store.fail("DEL");

    assert_store_error(&cache.clear().await, "DEL");
    assert_eq!(store.calls("DEL"), 3);
}

#[tokio::test]
async fn test_startup_count_failure_is_swallowed() {
    let store = Arc::new(FlakyStore::new(InMemoryKeyValueStore::new()));
    let cache = Cache::new(
        Arc::clone(&store),
        test_config("a").with_development_mode(true),
    )
    .expect("cache");
    store.fail("KEYS");

    cache.start().await;
    assert_eq!(store.calls("KEYS"), 1);
}

#[tokio::test]
async fn test_startup_skips_count_by_default() {
    let (store, cache) = flaky_cache("a");
    cache.start().await;
    assert_eq!(store.calls("KEYS"), 0);
    assert!(store.inner().is_empty().expect("empty"));
}

#[tokio::test]
async fn test_flaky_store_passes_through_when_healthy() {
    let (store, _) = flaky_cache("a");
    store.set("raw", "v", None).await.expect("set");
    assert_eq!(store.get("raw").await.expect("get"), Some("v".to_string()));
}

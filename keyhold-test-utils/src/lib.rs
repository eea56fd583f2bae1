//! keyhold Test Utilities
//!
//! Shared test infrastructure for the keyhold workspace:
//! - Proptest generators for keys, payloads and TTLs
//! - Fixtures modelling several processes over one store
//! - A fault-injecting store wrapper
//! - Assertions on keyhold error variants

pub use keyhold_core::{
    CacheError, ConfigError, KeyholdConfig, KeyholdError, KeyholdResult, LockPollPolicy,
    StoreError,
};
pub use keyhold_storage::{Cache, InMemoryKeyValueStore, KeyValueStore};

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a logical cache key. Never contains glob metacharacters.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_:.-]{0,23}"
    }

    /// Generate a key that may contain glob metacharacters.
    pub fn arb_awkward_key() -> impl Strategy<Value = String> {
        "[a-z*?\\[\\]\\\\:]{1,12}"
    }

    /// Generate an instance identity.
    pub fn arb_instance_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,16}"
    }

    /// Generate an arbitrary JSON payload, nested up to a few levels.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,32}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Generate a positive TTL between 1ms and 2 minutes.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..=120_000).prop_map(Duration::from_millis)
    }

    /// Generate an optional TTL.
    pub fn arb_optional_ttl() -> impl Strategy<Value = Option<Duration>> {
        prop::option::of(arb_ttl())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches for common testing scenarios.

    use super::*;

    pub const TEST_CACHE_PREFIX: &str = "test:cache:";
    pub const TEST_LOCK_PREFIX: &str = "test:lock:";

    /// Config with test prefixes, a fixed identity and a short poll interval.
    pub fn test_config(instance_id: &str) -> KeyholdConfig {
        KeyholdConfig::default()
            .with_cache_prefix(TEST_CACHE_PREFIX)
            .with_lock_prefix(TEST_LOCK_PREFIX)
            .with_instance_id(instance_id)
            .with_lock_poll(LockPollPolicy::fixed(Duration::from_millis(20)))
    }

    /// One in-memory store shared by any number of process identities.
    #[derive(Debug, Clone, Default)]
    pub struct SharedStore {
        pub store: Arc<InMemoryKeyValueStore>,
    }

    impl SharedStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A cache acting as process `instance_id`.
        pub fn instance(&self, instance_id: &str) -> Cache<InMemoryKeyValueStore> {
            self.instance_with(test_config(instance_id))
        }

        /// A cache over this store with a caller-supplied config.
        #[track_caller]
        pub fn instance_with(&self, config: KeyholdConfig) -> Cache<InMemoryKeyValueStore> {
            match Cache::new(Arc::clone(&self.store), config) {
                Ok(cache) => cache,
                Err(e) => panic!("fixture config rejected: {}", e),
            }
        }

        /// Two processes, `a` and `b`.
        pub fn pair(
            &self,
        ) -> (Cache<InMemoryKeyValueStore>, Cache<InMemoryKeyValueStore>) {
            (self.instance("a"), self.instance("b"))
        }
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

pub mod faults {
    //! A store wrapper that fails chosen commands on demand.

    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Wraps a store and fails any command named in its fault set.
    ///
    /// Command names are `GET`, `SET`, `SETNX`, `DEL`, `EXPIRE` and `KEYS`.
    /// Every call is counted, failed or not.
    pub struct FlakyStore<S> {
        inner: S,
        failing: Mutex<HashSet<&'static str>>,
        calls: Mutex<HashMap<&'static str, usize>>,
        set_with_ttl: bool,
    }

    impl<S: KeyValueStore> FlakyStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                failing: Mutex::new(HashSet::new()),
                calls: Mutex::new(HashMap::new()),
                set_with_ttl: true,
            }
        }

        /// Report `supports_set_with_ttl() == false`, forcing SET + EXPIRE.
        pub fn without_set_ttl(mut self) -> Self {
            self.set_with_ttl = false;
            self
        }

        pub fn inner(&self) -> &S {
            &self.inner
        }

        pub fn fail(&self, op: &'static str) {
            self.failing_set().insert(op);
        }

        pub fn heal(&self, op: &'static str) {
            self.failing_set().remove(op);
        }

        pub fn heal_all(&self) {
            self.failing_set().clear();
        }

        /// Number of times `op` has been issued.
        pub fn calls(&self, op: &'static str) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get(op)
                .copied()
                .unwrap_or(0)
        }

        fn failing_set(&self) -> std::sync::MutexGuard<'_, HashSet<&'static str>> {
            self.failing.lock().unwrap_or_else(|p| p.into_inner())
        }

        fn enter(&self, op: &'static str) -> KeyholdResult<()> {
            *self
                .calls
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .entry(op)
                .or_insert(0) += 1;
            if self.failing_set().contains(op) {
                return Err(StoreError::backend(op, "injected fault").into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl<S: KeyValueStore> KeyValueStore for FlakyStore<S> {
        async fn get(&self, key: &str) -> KeyholdResult<Option<String>> {
            self.enter("GET")?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KeyholdResult<()> {
            self.enter("SET")?;
            self.inner.set(key, value, ttl_secs).await
        }

        async fn set_nx(&self, key: &str, value: &str) -> KeyholdResult<bool> {
            self.enter("SETNX")?;
            self.inner.set_nx(key, value).await
        }

        async fn del(&self, key: &str) -> KeyholdResult<u64> {
            self.enter("DEL")?;
            self.inner.del(key).await
        }

        async fn expire(&self, key: &str, secs: i64) -> KeyholdResult<bool> {
            self.enter("EXPIRE")?;
            self.inner.expire(key, secs).await
        }

        async fn keys(&self, pattern: &str) -> KeyholdResult<Vec<String>> {
            self.enter("KEYS")?;
            self.inner.keys(pattern).await
        }

        fn supports_set_with_ttl(&self) -> bool {
            self.set_with_ttl
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on keyhold error variants.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &KeyholdResult<T>) {
        match result {
            Err(KeyholdError::Cache(CacheError::NotFound { .. })) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_locked<T: std::fmt::Debug>(result: &KeyholdResult<T>) {
        match result {
            Err(KeyholdError::Cache(CacheError::Locked { .. })) => {}
            other => panic!("Expected Locked, got: {:?}", other),
        }
    }

    /// Assert a store failure for a specific command.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &KeyholdResult<T>, op: &str) {
        match result {
            Err(KeyholdError::Store(StoreError::Backend { op: got, .. })) => {
                assert_eq!(*got, op, "Wrong command in store error");
            }
            other => panic!("Expected Store error for {}, got: {:?}", op, other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &KeyholdResult<T>) {
        match result {
            Err(KeyholdError::Config(ConfigError::InvalidValue { .. }))
            | Err(KeyholdError::Config(ConfigError::MissingRequired { .. })) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Host-facing entry point wiring the cache, lock and snapshot components
//! over one shared store handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keyhold_core::{
    InstanceId, KeyholdConfig, KeyholdResult, LockCheck, LockOutcome, UnlockOutcome,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::kv::KeyValueStore;
use crate::lock::LockManager;
use crate::snapshot::SnapshotManager;
use crate::store::{CacheStore, CachedValue, LoadOptions};

/// Shared cache for one process identity.
///
/// Construct one per process. Instances in different processes pointed at
/// the same store and prefixes share entries and contend on the same locks.
pub struct Cache<S: KeyValueStore> {
    config: KeyholdConfig,
    store: Arc<S>,
    entries: Arc<CacheStore<S>>,
    locks: Arc<LockManager<S>>,
    snapshots: SnapshotManager<S>,
}

impl<S: KeyValueStore> Cache<S> {
    /// Validate `config` and bind the components to `store`.
    pub fn new(store: Arc<S>, config: KeyholdConfig) -> KeyholdResult<Self> {
        config.validate()?;

        let locks = Arc::new(LockManager::new(Arc::clone(&store), &config));
        let entries = Arc::new(CacheStore::new(
            Arc::clone(&store),
            &config,
            Arc::clone(&locks),
        ));
        let snapshots = SnapshotManager::new(
            Arc::clone(&store),
            Arc::clone(&entries),
            config.snapshot_concurrency,
        );

        Ok(Self {
            config,
            store,
            entries,
            locks,
            snapshots,
        })
    }

    pub fn config(&self) -> &KeyholdConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Startup hook.
    ///
    /// In development mode, counts the namespace and logs it. Otherwise
    /// returns immediately without touching the store. A failed count is
    /// logged and never fails startup.
    pub async fn start(&self) {
        if !self.config.development_mode {
            return;
        }
        match self.entries.size().await {
            Ok(count) => tracing::debug!(
                count,
                prefix = self.entries.prefix(),
                "Connected to the cache with {} existing objects",
                count
            ),
            Err(e) => tracing::error!(error = %e, "Failed to count cache objects at startup"),
        }
    }

    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        options: LoadOptions,
    ) -> KeyholdResult<CachedValue<T>> {
        self.entries.load(key, options).await
    }

    pub async fn save<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expire: Option<Duration>,
    ) -> KeyholdResult<()> {
        self.entries.save(key, value, expire).await
    }

    pub async fn destroy(&self, key: &str) -> KeyholdResult<bool> {
        self.entries.destroy(key).await
    }

    pub async fn lock(&self, key: &str, lease: Option<Duration>) -> KeyholdResult<LockOutcome> {
        self.locks.lock(key, lease).await
    }

    pub async fn unlock(&self, key: &str) -> KeyholdResult<UnlockOutcome> {
        self.locks.unlock(key).await
    }

    pub async fn check_lock(
        &self,
        key: &str,
        max_wait: Option<Duration>,
    ) -> KeyholdResult<LockCheck> {
        self.locks.check_lock(key, max_wait).await
    }

    pub async fn holder(&self, key: &str) -> KeyholdResult<Option<String>> {
        self.locks.holder(key).await
    }

    pub async fn keys(&self) -> KeyholdResult<Vec<String>> {
        self.entries.keys().await
    }

    pub async fn locks(&self) -> KeyholdResult<Vec<String>> {
        self.locks.locks().await
    }

    pub async fn size(&self) -> KeyholdResult<usize> {
        self.entries.size().await
    }

    pub async fn clear(&self) -> KeyholdResult<u64> {
        self.entries.clear().await
    }

    pub async fn dump_write(&self, path: impl AsRef<Path>) -> KeyholdResult<usize> {
        self.snapshots.dump_write(path).await
    }

    pub async fn dump_read(&self, path: impl AsRef<Path>) -> KeyholdResult<usize> {
        self.snapshots.dump_read(path).await
    }
}

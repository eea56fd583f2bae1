//! TTL-aware cache of envelope-wrapped values.
//!
//! Every value is wrapped in exactly one [`CacheEnvelope`] and stored at
//! `cache_prefix + key`. Reads never consult the lock. Writes and deletes
//! do when locking is enabled: a lock held by another instance turns them
//! into [`CacheError::Locked`] without touching the stored value.
//!
//! Expiry is enforced by the backing store. TTLs arrive in milliseconds and
//! are rounded up to whole seconds before they reach it.

use std::sync::Arc;
use std::time::Duration;

use keyhold_core::{
    millis_to_timestamp, now_millis, ttl_secs_ceil, CacheEnvelope, CacheError, KeyholdConfig,
    KeyholdResult, LockCheck, Timestamp,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::bulk::run_bounded;
use crate::kv::{prefix_pattern, KeyValueStore};
use crate::lock::LockManager;

/// Options for [`CacheStore::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Reset the store-side TTL of the entry to this duration on read.
    ///
    /// The envelope itself is not rewritten, so its `expireTimestamp` and
    /// `createdAt` keep their original values.
    pub expire: Option<Duration>,
}

impl LoadOptions {
    pub fn refresh(expire: Duration) -> Self {
        Self {
            expire: Some(expire),
        }
    }
}

/// A successful cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub value: T,
    /// The expiry just applied by a refreshing read, otherwise the expiry
    /// recorded in the envelope.
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    /// The instant of this read.
    pub read_at: Timestamp,
}

/// Namespaced cache over a `KeyValueStore`.
pub struct CacheStore<S: KeyValueStore> {
    store: Arc<S>,
    cache_prefix: String,
    locks: Arc<LockManager<S>>,
    use_locks: bool,
    bulk_concurrency: usize,
}

impl<S: KeyValueStore> CacheStore<S> {
    pub fn new(store: Arc<S>, config: &KeyholdConfig, locks: Arc<LockManager<S>>) -> Self {
        Self {
            store,
            cache_prefix: config.cache_prefix.clone(),
            locks,
            use_locks: config.use_locks,
            bulk_concurrency: config.snapshot_concurrency,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.cache_prefix
    }

    pub fn locking_enabled(&self) -> bool {
        self.use_locks
    }

    /// Physical store key for `key`.
    pub fn cache_key(&self, key: &str) -> String {
        format!("{}{}", self.cache_prefix, key)
    }

    /// Read and decode the value at `key`.
    ///
    /// A missing entry and an entry that does not decode as
    /// `CacheEnvelope<T>` both fail with [`CacheError::NotFound`].
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        options: LoadOptions,
    ) -> KeyholdResult<CachedValue<T>> {
        let physical = self.cache_key(key);

        let Some(raw) = self.read_raw(&physical).await? else {
            tracing::debug!(key, "Cache miss");
            return Err(not_found(key));
        };

        let envelope = match CacheEnvelope::<T>::decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, key, "Discarding undecodable cache entry");
                return Err(not_found(key));
            }
        };

        let now = now_millis();
        let mut expires_at = envelope.expire_timestamp;

        if let Some(secs) = options.expire.map(ttl_secs_ceil).filter(|secs| *secs > 0) {
            self.store
                .expire(&physical, secs_i64(secs))
                .await
                .inspect_err(|e| tracing::error!(error = %e, key, "Failed to refresh cache TTL"))?;
            expires_at = Some(now.saturating_add(secs_i64(secs).saturating_mul(1000)));
        }

        Ok(CachedValue {
            value: envelope.value,
            expires_at: expires_at.map(millis_to_timestamp),
            created_at: millis_to_timestamp(envelope.created_at),
            read_at: millis_to_timestamp(now),
        })
    }

    /// Wrap `value` in an envelope and store it at `key`.
    ///
    /// With `expire`, the envelope records `now + expire` and the store TTL
    /// is `ceil(expire / 1s)`. A zero duration means no expiry. When locking
    /// is enabled and another instance holds the lock, nothing is written
    /// and the result is [`CacheError::Locked`].
    pub async fn save<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expire: Option<Duration>,
    ) -> KeyholdResult<()> {
        let expire = expire.filter(|ttl| !ttl.is_zero());
        let envelope = CacheEnvelope::new(value, expire, now_millis());
        let raw = envelope.encode().map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.ensure_unlocked(key).await?;
        self.write_raw(&self.cache_key(key), &raw, expire.map(ttl_secs_ceil))
            .await
    }

    /// Delete the entry at `key`.
    ///
    /// Returns true if exactly one key was removed. A missing key is not an
    /// error. Lock gating is the same as for [`CacheStore::save`].
    pub async fn destroy(&self, key: &str) -> KeyholdResult<bool> {
        self.ensure_unlocked(key).await?;

        let removed = self
            .store
            .del(&self.cache_key(key))
            .await
            .inspect_err(|e| tracing::error!(error = %e, key, "Failed to delete cache entry"))?;

        if removed != 1 {
            tracing::debug!(key, removed, "Destroy removed no entry");
        }
        Ok(removed == 1)
    }

    /// Physical keys of every entry in the cache namespace.
    pub async fn keys(&self) -> KeyholdResult<Vec<String>> {
        self.store
            .keys(&prefix_pattern(&self.cache_prefix))
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to list cache keys"))
    }

    /// Number of entries in the cache namespace. Walks the whole keyspace.
    pub async fn size(&self) -> KeyholdResult<usize> {
        Ok(self.keys().await?.len())
    }

    /// Delete every entry in the cache namespace, bypassing locks.
    ///
    /// Not atomic: entries written while the clear runs may survive it.
    /// Returns the number of keys actually removed.
    pub async fn clear(&self) -> KeyholdResult<u64> {
        let keys = self.keys().await?;
        let store = &self.store;
        let removed = run_bounded(keys, self.bulk_concurrency, "clear", |key| async move {
            store.del(&key).await
        })
        .await?;
        Ok(removed.into_iter().sum())
    }

    /// Raw, still-encoded value at a physical key.
    pub async fn read_raw(&self, physical_key: &str) -> KeyholdResult<Option<String>> {
        self.store
            .get(physical_key)
            .await
            .inspect_err(|e| tracing::error!(error = %e, key = physical_key, "Failed to read cache entry"))
    }

    /// Write an already-encoded envelope at a physical key.
    ///
    /// The TTL goes out with the write when the store supports it, and as a
    /// follow-up `EXPIRE` otherwise.
    pub async fn write_raw(
        &self,
        physical_key: &str,
        raw: &str,
        ttl_secs: Option<u64>,
    ) -> KeyholdResult<()> {
        let ttl_secs = ttl_secs.filter(|secs| *secs > 0);

        if ttl_secs.is_none() || self.store.supports_set_with_ttl() {
            return self
                .store
                .set(physical_key, raw, ttl_secs)
                .await
                .inspect_err(|e| tracing::error!(error = %e, key = physical_key, "Failed to write cache entry"));
        }

        self.store
            .set(physical_key, raw, None)
            .await
            .inspect_err(|e| tracing::error!(error = %e, key = physical_key, "Failed to write cache entry"))?;
        if let Some(secs) = ttl_secs {
            self.store
                .expire(physical_key, secs_i64(secs))
                .await
                .inspect_err(|e| tracing::error!(error = %e, key = physical_key, "Failed to apply cache TTL"))?;
        }
        Ok(())
    }

    /// Refuse mutation of `key` while another instance holds its lock.
    ///
    /// Any failure of the check itself also reports `Locked`, so callers see
    /// contention and backend trouble on this path the same way; the cause
    /// is logged.
    async fn ensure_unlocked(&self, key: &str) -> KeyholdResult<()> {
        if !self.use_locks {
            return Ok(());
        }
        match self.locks.check_lock(key, None).await {
            Ok(LockCheck::Allowed) => Ok(()),
            Ok(LockCheck::Denied) => Err(locked(key)),
            Err(e) => {
                tracing::warn!(error = %e, key, "Lock check failed, treating key as locked");
                Err(locked(key))
            }
        }
    }
}

fn not_found(key: &str) -> keyhold_core::KeyholdError {
    CacheError::NotFound {
        key: key.to_string(),
    }
    .into()
}

fn locked(key: &str) -> keyhold_core::KeyholdError {
    CacheError::Locked {
        key: key.to_string(),
    }
    .into()
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

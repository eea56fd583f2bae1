//! Whole-namespace export and import.
//!
//! A snapshot is one JSON object mapping each physical cache key to its raw
//! encoded envelope, exactly as the store held it. Envelopes are never
//! decoded into values on the way out or in, so a dump/restore cycle is
//! lossless for any payload.
//!
//! Snapshots bypass the lock manager and are not isolated from concurrent
//! writers. Run them as maintenance operations.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use keyhold_core::{now_millis, EnvelopeTiming, KeyholdError, KeyholdResult, SnapshotError};

use crate::bulk::run_bounded;
use crate::kv::KeyValueStore;
use crate::store::CacheStore;

/// Physical key to raw envelope, ordered so snapshot files diff cleanly.
pub type SnapshotEntries = BTreeMap<String, String>;

pub struct SnapshotManager<S: KeyValueStore> {
    cache: Arc<CacheStore<S>>,
    store: Arc<S>,
    concurrency: usize,
}

impl<S: KeyValueStore> SnapshotManager<S> {
    pub fn new(store: Arc<S>, cache: Arc<CacheStore<S>>, concurrency: usize) -> Self {
        Self {
            cache,
            store,
            concurrency,
        }
    }

    /// Collect every entry of the cache namespace.
    ///
    /// Keys that disappear between listing and reading are skipped.
    pub async fn export(&self) -> KeyholdResult<SnapshotEntries> {
        let keys = self.cache.keys().await?;
        let cache = &self.cache;
        let fetched = run_bounded(keys, self.concurrency, "dump", |key| async move {
            let raw = cache.read_raw(&key).await?;
            Ok::<_, KeyholdError>((key, raw))
        })
        .await?;

        let mut entries = SnapshotEntries::new();
        for (key, raw) in fetched {
            match raw {
                Some(raw) => {
                    entries.insert(key, raw);
                }
                None => tracing::debug!(key, "Key vanished during dump"),
            }
        }
        Ok(entries)
    }

    /// Write the cache namespace to `path`. Returns the number of entries.
    pub async fn dump_write(&self, path: impl AsRef<Path>) -> KeyholdResult<usize> {
        let path = path.as_ref();
        let entries = self.export().await?;

        let body = serde_json::to_vec_pretty(&entries).map_err(|e| SnapshotError::Format {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(path, body).await.map_err(|e| SnapshotError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(path = %path.display(), entries = entries.len(), "Wrote cache snapshot");
        Ok(entries.len())
    }

    /// Replace the cache namespace with the contents of `path`. Returns the
    /// number of entries written.
    ///
    /// The file is read and parsed before anything is deleted, so a missing
    /// or malformed snapshot leaves the cache untouched.
    pub async fn dump_read(&self, path: impl AsRef<Path>) -> KeyholdResult<usize> {
        let path = path.as_ref();
        let body = tokio::fs::read(path).await.map_err(|e| SnapshotError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let entries: SnapshotEntries =
            serde_json::from_slice(&body).map_err(|e| SnapshotError::Format {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let cleared = self.cache.clear().await?;
        let restored = self.import(entries).await?;

        tracing::info!(
            path = %path.display(),
            cleared,
            restored,
            "Restored cache snapshot"
        );
        Ok(restored)
    }

    /// Write `entries` verbatim, re-deriving each store TTL from the
    /// envelope's `expireTimestamp`.
    ///
    /// An already-stale entry gets a non-positive expiry, which the store
    /// treats as an immediate delete.
    pub async fn import(&self, entries: SnapshotEntries) -> KeyholdResult<usize> {
        let store = &self.store;
        let now = now_millis();
        let written = run_bounded(entries, self.concurrency, "restore", |(key, raw)| async move {
            store
                .set(&key, &raw, None)
                .await
                .inspect_err(|e| tracing::error!(error = %e, key, "Failed to restore entry"))?;

            let remaining = match EnvelopeTiming::peek(&raw) {
                Ok(timing) => timing.remaining_secs(now),
                Err(e) => {
                    tracing::warn!(error = %e, key, "Restored entry has no readable timing");
                    None
                }
            };
            if let Some(secs) = remaining {
                store.expire(&key, secs).await.inspect_err(
                    |e| tracing::error!(error = %e, key, "Failed to restore entry TTL"),
                )?;
            }
            Ok::<_, KeyholdError>(())
        })
        .await?;
        Ok(written.len())
    }
}

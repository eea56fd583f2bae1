//! In-process `KeyValueStore` with store-side expiry.
//!
//! Deadlines are tracked on the tokio clock, so tests running with a paused
//! runtime can advance time deterministically. Expired entries are dropped
//! lazily whenever they are touched or listed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use keyhold_core::{KeyholdResult, StoreError};
use tokio::time::Instant;

use crate::kv::{glob_match, KeyValueStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Shared in-memory store. Cloning yields another handle to the same data,
/// which is how tests model several processes talking to one server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining store-side TTL of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> KeyholdResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.read("TTL")?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    /// Number of live keys across every namespace.
    pub fn len(&self) -> KeyholdResult<usize> {
        let now = Instant::now();
        let entries = self.read("DBSIZE")?;
        Ok(entries.values().filter(|entry| entry.is_live(now)).count())
    }

    pub fn is_empty(&self) -> KeyholdResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(
        &self,
        op: &'static str,
    ) -> KeyholdResult<RwLockReadGuard<'_, HashMap<String, MemoryEntry>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::backend(op, "store lock poisoned").into())
    }

    fn write(
        &self,
        op: &'static str,
    ) -> KeyholdResult<RwLockWriteGuard<'_, HashMap<String, MemoryEntry>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::backend(op, "store lock poisoned").into())
    }
}

fn deadline_after(secs: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(secs))
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> KeyholdResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.write("GET")?;
        let value = entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.value.clone()));
        match value {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KeyholdResult<()> {
        let mut entries = self.write("SET")?;
        // SET EX 0 is rejected by Redis; treat it as an immediate expiry.
        if ttl_secs == Some(0) {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl_secs.and_then(deadline_after),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> KeyholdResult<bool> {
        let now = Instant::now();
        let mut entries = self.write("SETNX")?;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> KeyholdResult<u64> {
        let now = Instant::now();
        let mut entries = self.write("DEL")?;
        match entries.remove(key) {
            Some(entry) if entry.is_live(now) => Ok(1),
            _ => Ok(0),
        }
    }

    async fn expire(&self, key: &str, secs: i64) -> KeyholdResult<bool> {
        let now = Instant::now();
        let mut entries = self.write("EXPIRE")?;
        let live = entries.get(key).is_some_and(|entry| entry.is_live(now));
        if !live {
            entries.remove(key);
            return Ok(false);
        }
        if secs <= 0 {
            entries.remove(key);
            return Ok(true);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline_after(secs.unsigned_abs());
        }
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> KeyholdResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.write("KEYS")?;
        entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

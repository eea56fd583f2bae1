//! Redis-backed `KeyValueStore`.
//!
//! Requires the `redis` feature to be enabled.

use async_trait::async_trait;
use keyhold_core::{KeyholdResult, StoreError};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

use crate::kv::KeyValueStore;

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl RedisConfig {
    /// Create from the `KEYHOLD_REDIS_URL` environment variable.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("KEYHOLD_REDIS_URL")
                .unwrap_or_else(|_| Self::default().url),
        }
    }
}

/// Redis store over a single multiplexed connection.
///
/// The connection is cheap to clone; each command clones it so concurrent
/// callers pipeline over the same socket.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: MultiplexedConnection,
}

impl RedisKeyValueStore {
    pub async fn connect(config: &RedisConfig) -> KeyholdResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| StoreError::Connection {
            reason: format!("Redis client error: {}", e),
        })?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection {
                reason: format!("Redis connection error: {}", e),
            })?;

        Ok(Self { conn })
    }

    pub async fn from_env() -> KeyholdResult<Self> {
        Self::connect(&RedisConfig::from_env()).await
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> KeyholdResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::backend("GET", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KeyholdResult<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(secs) => {
                let _: () = conn
                    .set_ex(key, value, secs)
                    .await
                    .map_err(|e| StoreError::backend("SETEX", e))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| StoreError::backend("SET", e))?;
            }
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> KeyholdResult<bool> {
        let mut conn = self.conn.clone();
        let written: bool = conn
            .set_nx(key, value)
            .await
            .map_err(|e| StoreError::backend("SETNX", e))?;
        Ok(written)
    }

    async fn del(&self, key: &str) -> KeyholdResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| StoreError::backend("DEL", e))?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, secs: i64) -> KeyholdResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = conn
            .expire(key, secs)
            .await
            .map_err(|e| StoreError::backend("EXPIRE", e))?;
        Ok(applied)
    }

    async fn keys(&self, pattern: &str) -> KeyholdResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| StoreError::backend("KEYS", e))?;
        Ok(keys)
    }
}

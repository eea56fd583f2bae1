//! keyhold Storage - Shared Cache, Locks and Snapshots
//!
//! A process-shared cache over a remote key-value store:
//! - TTL-aware load/save/destroy of serializable values ([`CacheStore`])
//! - a cooperative, lease-based advisory lock per cache key ([`LockManager`])
//! - whole-namespace dump and restore to a JSON file ([`SnapshotManager`])
//!
//! [`Cache`] bundles the three for a single process identity. Every
//! component is generic over [`KeyValueStore`]; an in-process store ships
//! for tests and a Redis store is available behind the `redis` feature.

mod bulk;
pub mod cache;
pub mod kv;
pub mod lock;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod snapshot;
pub mod store;

pub use cache::Cache;
pub use kv::{glob_match, prefix_pattern, KeyValueStore};
pub use lock::LockManager;
pub use memory::InMemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisKeyValueStore};
pub use snapshot::{SnapshotEntries, SnapshotManager};
pub use store::{CacheStore, CachedValue, LoadOptions};

//! keyhold Core - Shared Types
//!
//! Data model, configuration and error taxonomy for the keyhold shared
//! cache. Every other keyhold crate depends on this one; it performs no I/O.

pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod lock;

pub use config::{Backoff, KeyholdConfig, LockPollPolicy};
pub use envelope::{ttl_secs_ceil, CacheEnvelope, EnvelopeTiming};
pub use error::{
    CacheError, ConfigError, KeyholdError, KeyholdResult, SnapshotError, StoreError,
};
pub use identity::{millis_to_timestamp, now_millis, EpochMillis, InstanceId, Timestamp};
pub use lock::{LockCheck, LockOutcome, UnlockOutcome};

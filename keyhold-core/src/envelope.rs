//! The envelope persisted for every cache key, and the TTL arithmetic that
//! goes with it.
//!
//! Callers hand TTLs over in milliseconds while the backing store counts
//! whole seconds. Every conversion here rounds up, so a requested TTL is
//! never shortened by rounding.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use crate::identity::EpochMillis;

/// The unit persisted per cache key.
///
/// Field names are camelCase on the wire so that envelopes written by other
/// processes sharing the namespace decode unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    pub value: T,
    /// Absolute instant after which the entry is stale; `None` never expires.
    #[serde(default)]
    pub expire_timestamp: Option<EpochMillis>,
    pub created_at: EpochMillis,
    /// Reserved. Always `None` at write time and never populated by reads.
    #[serde(default)]
    pub read_at: Option<EpochMillis>,
}

impl<T> CacheEnvelope<T> {
    /// Wrap `value`, stamping it with `now` and an optional lifetime.
    pub fn new(value: T, expire_after: Option<Duration>, now: EpochMillis) -> Self {
        Self {
            value,
            expire_timestamp: expire_after.map(|ttl| now.saturating_add(duration_millis(ttl))),
            created_at: now,
            read_at: None,
        }
    }
}

impl<T: Serialize> CacheEnvelope<T> {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<T: DeserializeOwned> CacheEnvelope<T> {
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Timing fields of an envelope, decoded without touching the payload.
///
/// Snapshot restore only needs the expiry instant, and must not round-trip
/// the value through a typed decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeTiming {
    #[serde(default)]
    pub expire_timestamp: Option<EpochMillis>,
    #[serde(default)]
    pub created_at: Option<EpochMillis>,
}

impl EnvelopeTiming {
    pub fn peek(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Seconds left before expiry at `now`, or `None` for a non-expiring
    /// envelope. May be zero or negative for an already-stale entry.
    pub fn remaining_secs(&self, now: EpochMillis) -> Option<i64> {
        self.expire_timestamp
            .map(|expire_at| ceil_div_1000(expire_at.saturating_sub(now)))
    }
}

/// Store-level TTL in whole seconds for a caller TTL, rounded up.
pub fn ttl_secs_ceil(ttl: Duration) -> u64 {
    let millis = ttl.as_millis();
    let secs = millis.div_ceil(1000);
    u64::try_from(secs).unwrap_or(u64::MAX)
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// `ceil(ms / 1000)` for signed values, matching Math.ceil semantics.
fn ceil_div_1000(ms: i64) -> i64 {
    let q = ms / 1000;
    if ms % 1000 > 0 {
        q + 1
    } else {
        q
    }
}

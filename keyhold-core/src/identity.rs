//! Identity and time types shared by every keyhold component.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Milliseconds since the Unix epoch, as persisted inside envelopes.
pub type EpochMillis = i64;

/// Identity of a running process instance, used as the owner of every lock
/// it takes.
///
/// The identifier is chosen once (normally at configuration time) and must
/// stay stable for the lifetime of the instance: a lock held under one
/// `InstanceId` is only re-entrant for callers presenting the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap an existing identifier (e.g. a hostname-pid pair from the host).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier backed by a UUIDv7.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the value read back from a lock entry names this instance.
    pub fn owns(&self, holder: &str) -> bool {
        self.0 == holder
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds into a [`Timestamp`].
///
/// Out-of-range values clamp to the Unix epoch rather than failing; they can
/// only come from a corrupted envelope.
pub fn millis_to_timestamp(millis: EpochMillis) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

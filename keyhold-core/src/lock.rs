//! Outcomes of the advisory lock protocol.
//!
//! The lock is advisory: its entry in the store only records which instance
//! claims it, and cooperating callers are expected to check it before
//! mutating. These enums are what the protocol reports back.
//!
//! ```text
//! check_lock ──→ Allowed | Denied
//! lock       ──→ Acquired | Denied
//! unlock     ──→ Released | Denied
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of reading a lock entry on behalf of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockCheck {
    /// No lock exists, or this instance holds it.
    Allowed,
    /// Another instance holds the lock (after any permitted wait).
    Denied,
}

impl LockCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LockCheck::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockCheck::Allowed => "allowed",
            LockCheck::Denied => "denied",
        }
    }
}

impl fmt::Display for LockCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockOutcome {
    /// The entry names this instance and carries a fresh lease.
    Acquired,
    /// Held elsewhere, or the lease could not be applied.
    Denied,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockOutcome::Acquired => "acquired",
            LockOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for LockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnlockOutcome {
    /// The lock entry was deleted (or was already absent).
    Released,
    /// The lock belongs to another instance and was left in place.
    Denied,
}

impl UnlockOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, UnlockOutcome::Released)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockOutcome::Released => "released",
            UnlockOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for UnlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

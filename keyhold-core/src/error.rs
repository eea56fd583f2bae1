//! Error types for keyhold operations

use thiserror::Error;

/// Failures surfaced by the backing key-value store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {op} failed: {reason}")]
    Backend { op: &'static str, reason: String },

    #[error("Store connection failed: {reason}")]
    Connection { reason: String },
}

impl StoreError {
    pub fn backend(op: &'static str, reason: impl ToString) -> Self {
        StoreError::Backend {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Cache-level outcomes that callers are expected to branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Read miss, or an entry that could not be decoded.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// A mutating operation was refused because another instance holds the
    /// lock for this key.
    #[error("Object locked: {key}")]
    Locked { key: String },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Snapshot file errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Snapshot {path} is malformed: {reason}")]
    Format { path: String, reason: String },
}

/// Master error type for all keyhold errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyholdError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl KeyholdError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyholdError::Cache(CacheError::NotFound { .. }))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, KeyholdError::Cache(CacheError::Locked { .. }))
    }

    /// True for transport/backend failures, as opposed to contention or misses.
    pub fn is_store(&self) -> bool {
        matches!(self, KeyholdError::Store(_))
    }
}

/// Result type alias for keyhold operations.
pub type KeyholdResult<T> = Result<T, KeyholdError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_backend() {
        let err = StoreError::backend("GET", "connection reset");
        let msg = format!("{}", err);
        assert!(msg.contains("GET"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_cache_error_display_locked() {
        let err = CacheError::Locked {
            key: "user:1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("locked"));
        assert!(msg.contains("user:1"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "lock_prefix".to_string(),
            value: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("lock_prefix"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_snapshot_error_display_format() {
        let err = SnapshotError::Format {
            path: "/tmp/dump.json".to_string(),
            reason: "expected map".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/dump.json"));
        assert!(msg.contains("expected map"));
    }

    #[test]
    fn test_keyhold_error_from_variants() {
        let store = KeyholdError::from(StoreError::Connection {
            reason: "refused".to_string(),
        });
        assert!(store.is_store());

        let missing = KeyholdError::from(CacheError::NotFound {
            key: "a".to_string(),
        });
        assert!(missing.is_not_found());
        assert!(!missing.is_locked());

        let locked = KeyholdError::from(CacheError::Locked {
            key: "a".to_string(),
        });
        assert!(locked.is_locked());
        assert!(!locked.is_store());

        let config = KeyholdError::from(ConfigError::MissingRequired {
            field: "cache_prefix".to_string(),
        });
        assert!(matches!(config, KeyholdError::Config(_)));

        let snapshot = KeyholdError::from(SnapshotError::Io {
            path: "x".to_string(),
            reason: "denied".to_string(),
        });
        assert!(matches!(snapshot, KeyholdError::Snapshot(_)));
    }
}

//! Configuration types

use std::time::Duration;

use crate::error::{ConfigError, KeyholdResult};
use crate::identity::InstanceId;

/// Delay strategy between lock polls.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Poll at the base interval every time.
    Fixed,
    /// Multiply the delay after each poll, capped at `max_interval`.
    Exponential {
        multiplier: f64,
        max_interval: Duration,
        /// Randomise each delay within `[delay / 2, delay]`.
        jitter: bool,
    },
}

/// How `check_lock` polls while waiting for another holder to let go.
#[derive(Debug, Clone, PartialEq)]
pub struct LockPollPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
}

impl Default for LockPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            backoff: Backoff::Fixed,
        }
    }
}

impl LockPollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(interval: Duration, max_interval: Duration) -> Self {
        Self {
            interval,
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_interval,
                jitter: true,
            },
        }
    }

    /// Undithered delay before poll number `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                multiplier,
                max_interval,
                ..
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                let scaled = self.interval.as_nanos() as f64 * factor;
                if !scaled.is_finite() || scaled >= max_interval.as_nanos() as f64 {
                    *max_interval
                } else {
                    Duration::from_nanos(scaled.round() as u64)
                }
            }
        }
    }
}

/// Cache configuration.
///
/// Values not supplied fall back to the defaults documented on each field.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyholdConfig {
    /// Prefix of every physical cache key (default `keyhold:cache:`).
    pub cache_prefix: String,
    /// Prefix of every physical lock key (default `keyhold:lock:`).
    pub lock_prefix: String,
    /// Lease applied to a lock when the caller does not pass one (default 10s).
    pub lock_duration: Duration,
    /// Gate save/destroy on the lock check (default true).
    pub use_locks: bool,
    /// Owner identity written into lock entries.
    pub instance_id: InstanceId,
    pub lock_poll: LockPollPolicy,
    /// Count the namespace at startup (default false; KEYS is expensive).
    pub development_mode: bool,
    /// Maximum in-flight store calls during clear/dump/restore (default 32).
    pub snapshot_concurrency: usize,
}

impl Default for KeyholdConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "keyhold:cache:".to_string(),
            lock_prefix: "keyhold:lock:".to_string(),
            lock_duration: Duration::from_secs(10),
            use_locks: true,
            instance_id: InstanceId::generate(),
            lock_poll: LockPollPolicy::default(),
            development_mode: false,
            snapshot_concurrency: 32,
        }
    }
}

impl KeyholdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `KEYHOLD_CACHE_PREFIX`, `KEYHOLD_LOCK_PREFIX`
    /// - `KEYHOLD_LOCK_DURATION_MS`: default lock lease (default: 10000)
    /// - `KEYHOLD_USE_LOCKS`: "true" or "false" (default: true)
    /// - `KEYHOLD_INSTANCE_ID`: lock owner identity (default: generated)
    /// - `KEYHOLD_LOCK_POLL_MS`: poll interval (default: 100)
    /// - `KEYHOLD_LOCK_BACKOFF`: "fixed" or "exponential" (default: fixed)
    /// - `KEYHOLD_LOCK_MAX_POLL_MS`: exponential backoff cap (default: 1000)
    /// - `KEYHOLD_DEVELOPMENT_MODE`: "true" or "1" to count keys at startup
    /// - `KEYHOLD_SNAPSHOT_CONCURRENCY`: bulk operation fan-out (default: 32)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_prefix =
            std::env::var("KEYHOLD_CACHE_PREFIX").unwrap_or(defaults.cache_prefix);
        let lock_prefix = std::env::var("KEYHOLD_LOCK_PREFIX").unwrap_or(defaults.lock_prefix);

        let lock_duration = env_parse::<u64>("KEYHOLD_LOCK_DURATION_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_duration);

        let use_locks = std::env::var("KEYHOLD_USE_LOCKS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.use_locks);

        let instance_id = std::env::var("KEYHOLD_INSTANCE_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .map(InstanceId::from)
            .unwrap_or(defaults.instance_id);

        let poll_interval = env_parse::<u64>("KEYHOLD_LOCK_POLL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_poll.interval);
        let max_poll = env_parse::<u64>("KEYHOLD_LOCK_MAX_POLL_MS")
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(1));
        let lock_poll = match std::env::var("KEYHOLD_LOCK_BACKOFF")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Ok("exponential") => LockPollPolicy::exponential(poll_interval, max_poll),
            _ => LockPollPolicy::fixed(poll_interval),
        };

        let development_mode = std::env::var("KEYHOLD_DEVELOPMENT_MODE")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(defaults.development_mode);

        let snapshot_concurrency = env_parse::<usize>("KEYHOLD_SNAPSHOT_CONCURRENCY")
            .unwrap_or(defaults.snapshot_concurrency);

        Self {
            cache_prefix,
            lock_prefix,
            lock_duration,
            use_locks,
            instance_id,
            lock_poll,
            development_mode,
            snapshot_concurrency,
        }
    }

    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.use_locks = enabled;
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<InstanceId>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_lock_poll(mut self, policy: LockPollPolicy) -> Self {
        self.lock_poll = policy;
        self
    }

    pub fn with_development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    pub fn with_snapshot_concurrency(mut self, concurrency: usize) -> Self {
        self.snapshot_concurrency = concurrency;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - both prefixes are non-empty and differ, so the namespaces cannot collide
    /// - lock_duration and the poll interval are positive
    /// - snapshot_concurrency > 0
    /// - the instance id is non-empty
    pub fn validate(&self) -> KeyholdResult<()> {
        if self.cache_prefix.is_empty() {
            return Err(invalid("cache_prefix", "", "cache_prefix must not be empty"));
        }

        if self.lock_prefix.is_empty() {
            return Err(invalid("lock_prefix", "", "lock_prefix must not be empty"));
        }

        if self.cache_prefix.starts_with(&self.lock_prefix)
            || self.lock_prefix.starts_with(&self.cache_prefix)
        {
            return Err(invalid(
                "lock_prefix",
                &self.lock_prefix,
                "lock and cache prefixes must not overlap",
            ));
        }

        if self.lock_duration.is_zero() {
            return Err(invalid(
                "lock_duration",
                &format!("{:?}", self.lock_duration),
                "lock_duration must be positive",
            ));
        }

        if self.lock_poll.interval.is_zero() {
            return Err(invalid(
                "lock_poll.interval",
                &format!("{:?}", self.lock_poll.interval),
                "poll interval must be positive",
            ));
        }

        if self.snapshot_concurrency == 0 {
            return Err(invalid(
                "snapshot_concurrency",
                "0",
                "snapshot_concurrency must be greater than 0",
            ));
        }

        if self.instance_id.as_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "instance_id".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::KeyholdError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyholdError;

    #[test]
    fn test_default_config_is_valid() {
        let config = KeyholdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_poll.interval, Duration::from_millis(100));
        assert!(config.use_locks);
        assert!(!config.development_mode);
    }

    #[test]
    fn test_empty_cache_prefix_rejected() {
        let config = KeyholdConfig::default().with_cache_prefix("");
        let err = config.validate().expect_err("empty prefix must fail");
        assert!(matches!(
            err,
            KeyholdError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "cache_prefix"
        ));
    }

    #[test]
    fn test_overlapping_prefixes_rejected() {
        let same = KeyholdConfig::default()
            .with_cache_prefix("app:")
            .with_lock_prefix("app:");
        assert!(same.validate().is_err());

        let nested = KeyholdConfig::default()
            .with_cache_prefix("app:")
            .with_lock_prefix("app:lock:");
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let lease = KeyholdConfig::default().with_lock_duration(Duration::ZERO);
        assert!(lease.validate().is_err());

        let poll = KeyholdConfig::default().with_lock_poll(LockPollPolicy::fixed(Duration::ZERO));
        assert!(poll.validate().is_err());

        let fanout = KeyholdConfig::default().with_snapshot_concurrency(0);
        assert!(fanout.validate().is_err());
    }

    #[test]
    fn test_empty_instance_id_rejected() {
        let config = KeyholdConfig::default().with_instance_id("");
        let err = config.validate().expect_err("empty id must fail");
        assert!(matches!(
            err,
            KeyholdError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let policy = LockPollPolicy::fixed(Duration::from_millis(50));
        assert_eq!(policy.base_delay(0), Duration::from_millis(50));
        assert_eq!(policy.base_delay(9), Duration::from_millis(50));
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy =
            LockPollPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
        assert_eq!(policy.base_delay(40), Duration::from_millis(500));
    }
}

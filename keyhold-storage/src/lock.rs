//! Advisory distributed lock over a `KeyValueStore`.
//!
//! A lock is a store entry at `lock_prefix + key` whose value is the
//! [`InstanceId`] of its holder. It always carries a store-side lease so a
//! crashed holder cannot wedge the key forever.
//!
//! # Guarantees
//!
//! The lock is advisory and best-effort:
//! - `lock` and `unlock` check ownership before acting, and the check and
//!   the act are separate store calls. Two instances racing through that
//!   window can both observe "free"; only one `SETNX` wins, and the loser is
//!   told `Denied` because the holder it reads back is not itself.
//! - `unlock` can still race a lease expiry followed by another instance's
//!   acquisition.
//! - There are no fencing tokens. A holder whose lease ran out is not told.
//!
//! An instance is never blocked by its own lock, so one process can issue
//! several guarded writes while holding it.

use std::sync::Arc;
use std::time::Duration;

use keyhold_core::{
    ttl_secs_ceil, Backoff, InstanceId, KeyholdConfig, KeyholdResult, LockCheck, LockOutcome,
    LockPollPolicy, UnlockOutcome,
};
use rand::Rng;
use tokio::time::Instant;

use crate::kv::{prefix_pattern, KeyValueStore};

/// Lock protocol bound to one process identity.
pub struct LockManager<S: KeyValueStore> {
    store: Arc<S>,
    lock_prefix: String,
    owner: InstanceId,
    default_lease: Duration,
    poll: LockPollPolicy,
}

impl<S: KeyValueStore> LockManager<S> {
    pub fn new(store: Arc<S>, config: &KeyholdConfig) -> Self {
        Self {
            store,
            lock_prefix: config.lock_prefix.clone(),
            owner: config.instance_id.clone(),
            default_lease: config.lock_duration,
            poll: config.lock_poll.clone(),
        }
    }

    /// Identity written into every lock this manager takes.
    pub fn owner(&self) -> &InstanceId {
        &self.owner
    }

    pub fn poll_policy(&self) -> &LockPollPolicy {
        &self.poll
    }

    /// Physical store key of the lock guarding `key`.
    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{}", self.lock_prefix, key)
    }

    /// Current holder of the lock on `key`, if any.
    pub async fn holder(&self, key: &str) -> KeyholdResult<Option<String>> {
        self.store
            .get(&self.lock_key(key))
            .await
            .inspect_err(|e| tracing::error!(error = %e, key, "Failed to read lock"))
    }

    /// Physical keys of every lock currently present in the namespace.
    pub async fn locks(&self) -> KeyholdResult<Vec<String>> {
        self.store
            .keys(&prefix_pattern(&self.lock_prefix))
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to list locks"))
    }

    /// Whether this instance may mutate `key`.
    ///
    /// Allowed when the lock is absent or held by this instance. When it is
    /// held elsewhere and `max_wait` is `None`, resolves `Denied` at once.
    /// With a wait budget the check is repeated on the poll policy until the
    /// holder lets go or more than `max_wait` has elapsed since the first
    /// read. Waiters are not queued: whoever polls first after a release wins.
    pub async fn check_lock(
        &self,
        key: &str,
        max_wait: Option<Duration>,
    ) -> KeyholdResult<LockCheck> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let holder = match self.holder(key).await? {
                None => return Ok(LockCheck::Allowed),
                Some(holder) if self.owner.owns(&holder) => return Ok(LockCheck::Allowed),
                Some(holder) => holder,
            };

            let Some(max_wait) = max_wait else {
                tracing::debug!(key, holder = %holder, "Lock held by another instance");
                return Ok(LockCheck::Denied);
            };

            let elapsed = started.elapsed();
            if elapsed > max_wait {
                tracing::debug!(
                    key,
                    holder = %holder,
                    waited_ms = elapsed.as_millis() as u64,
                    "Gave up waiting for lock"
                );
                return Ok(LockCheck::Denied);
            }

            // Never sleep past the deadline by more than a tick, so the final
            // denial lands within one poll interval of `max_wait`.
            let until_deadline = max_wait - elapsed + Duration::from_millis(1);
            tokio::time::sleep(self.poll_delay(attempt).min(until_deadline)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Try to take the lock on `key` for `lease` (default: configured lock
    /// duration).
    ///
    /// Re-acquiring a lock this instance already holds succeeds and renews
    /// its lease. If the lease cannot be applied the result is an error (or
    /// `Denied` if the entry vanished), and callers should treat the key as
    /// eligible for cleanup or retry.
    pub async fn lock(&self, key: &str, lease: Option<Duration>) -> KeyholdResult<LockOutcome> {
        if !self.check_lock(key, None).await?.is_allowed() {
            return Ok(LockOutcome::Denied);
        }

        let lock_key = self.lock_key(key);
        let written = self
            .store
            .set_nx(&lock_key, self.owner.as_str())
            .await
            .inspect_err(|e| tracing::error!(error = %e, key, "Failed to write lock"))?;

        if !written {
            match self.holder(key).await? {
                Some(holder) if self.owner.owns(&holder) => {}
                other => {
                    tracing::debug!(key, holder = ?other, "Lost lock acquisition race");
                    return Ok(LockOutcome::Denied);
                }
            }
        }

        let lease = lease.unwrap_or(self.default_lease);
        let lease_secs = ttl_secs_ceil(lease).max(1);
        let applied = self
            .store
            .expire(&lock_key, i64::try_from(lease_secs).unwrap_or(i64::MAX))
            .await
            .inspect_err(|e| tracing::error!(error = %e, key, "Failed to apply lock lease"))?;

        if applied {
            Ok(LockOutcome::Acquired)
        } else {
            tracing::warn!(key, "Lock entry vanished before its lease was applied");
            Ok(LockOutcome::Denied)
        }
    }

    /// Release the lock on `key` if this instance may.
    ///
    /// Releasing a lock that does not exist reports `Released`.
    pub async fn unlock(&self, key: &str) -> KeyholdResult<UnlockOutcome> {
        if !self.check_lock(key, None).await?.is_allowed() {
            return Ok(UnlockOutcome::Denied);
        }

        self.store
            .del(&self.lock_key(key))
            .await
            .inspect_err(|e| tracing::error!(error = %e, key, "Failed to delete lock"))?;
        Ok(UnlockOutcome::Released)
    }

    fn poll_delay(&self, attempt: u32) -> Duration {
        let base = self.poll.base_delay(attempt);
        match self.poll.backoff {
            Backoff::Exponential { jitter: true, .. } => jittered(base),
            _ => base,
        }
    }
}

// Uniform in [delay / 2, delay].
fn jittered(delay: Duration) -> Duration {
    let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    if nanos < 2 {
        return delay;
    }
    Duration::from_nanos(rand::rng().random_range(nanos / 2..=nanos))
}

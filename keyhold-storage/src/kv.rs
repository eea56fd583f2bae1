//! The key-value capability set every keyhold component is written against.
//!
//! The cache, the lock manager and the snapshot manager never talk to a
//! concrete client; they take any `KeyValueStore`. Semantics follow Redis:
//! single-key operations are atomic, there are no multi-key transactions,
//! and expiry is tracked by the store itself.

use std::sync::Arc;

use async_trait::async_trait;
use keyhold_core::KeyholdResult;

/// Remote key-value store offering GET/SET/SETNX/DEL/EXPIRE/KEYS.
///
/// # Key listing
///
/// `keys` takes a glob pattern (`*` and `?`) and walks the whole keyspace.
/// It is meant for diagnostics, startup counts and snapshot work, never for
/// steady-state request paths.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value at `key`.
    async fn get(&self, key: &str) -> KeyholdResult<Option<String>>;

    /// Write `value` at `key`, replacing any previous value and expiry.
    ///
    /// With `ttl_secs`, the expiry is applied in the same command.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KeyholdResult<()>;

    /// Write `value` only if `key` is absent. Returns whether it was written.
    async fn set_nx(&self, key: &str, value: &str) -> KeyholdResult<bool>;

    /// Delete `key`, returning the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> KeyholdResult<u64>;

    /// Set the expiry of `key` to `secs` from now.
    ///
    /// Zero or negative seconds delete the key. Returns false if the key
    /// does not exist.
    async fn expire(&self, key: &str, secs: i64) -> KeyholdResult<bool>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> KeyholdResult<Vec<String>>;

    /// Whether `set` applies `ttl_secs` atomically with the write.
    ///
    /// Stores returning false get the TTL as a follow-up `expire` call.
    fn supports_set_with_ttl(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &str) -> KeyholdResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KeyholdResult<()> {
        (**self).set(key, value, ttl_secs).await
    }

    async fn set_nx(&self, key: &str, value: &str) -> KeyholdResult<bool> {
        (**self).set_nx(key, value).await
    }

    async fn del(&self, key: &str) -> KeyholdResult<u64> {
        (**self).del(key).await
    }

    async fn expire(&self, key: &str, secs: i64) -> KeyholdResult<bool> {
        (**self).expire(key, secs).await
    }

    async fn keys(&self, pattern: &str) -> KeyholdResult<Vec<String>> {
        (**self).keys(pattern).await
    }

    fn supports_set_with_ttl(&self) -> bool {
        (**self).supports_set_with_ttl()
    }
}

/// Glob pattern matching every key under `prefix`.
///
/// Glob metacharacters inside the prefix are escaped so that a prefix such
/// as `app[1]:` matches literally.
pub fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Redis-style glob match supporting `*`, `?` and backslash escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    glob_match_from(&pattern, &key)
}

fn glob_match_from(pattern: &[char], key: &[char]) -> bool {
    let (mut p, mut k) = (0, 0);
    // Backtrack point: (pattern index after '*', key index it matched up to).
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p + 1, k));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                k += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == key[k] {
                    p += 2;
                    k += 1;
                    continue;
                }
            }
            Some(c) if *c == key[k] => {
                p += 1;
                k += 1;
                continue;
            }
            _ => {}
        }

        match star {
            Some((sp, sk)) => {
                p = sp;
                k = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

//! TTL-bounded distributed locks over the fast shared store.
//!
//! Two independent concerns use these locks:
//!
//! - the identifier cache's stampede lock, serializing cold-cache population
//!   for one key;
//! - the materialization worker's execution lock, keeping two redundant
//!   deliveries of the same `(parent, number)` job from racing each other
//!   inside the create-or-noop step.
//!
//! A lock is a `set-if-absent-with-expiry` entry holding a random fencing
//! token. Release deletes the entry only if it still holds that token, so a
//! holder whose TTL lapsed cannot release a successor's lock. The TTL bounds
//! how long a crashed holder can block others.

use crate::error::{Error, Result};
use crate::store::KvStore;
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, sleep};

/// A held lock. Must be handed back to [`LockManager::release`]; dropping it
/// without releasing leaves the entry to expire on its TTL.
#[derive(Debug)]
pub struct LockToken {
    key: String,
    token: u64,
}

/// Acquires and releases TTL-bounded locks keyed by arbitrary strings.
pub struct LockManager<S> {
    kv: Arc<S>,
}

impl<S> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
        }
    }
}

impl<S: KvStore> LockManager<S> {
    pub fn new(kv: Arc<S>) -> Self {
        Self { kv }
    }

    /// Attempts to acquire the lock once, without waiting.
    ///
    /// Returns `Ok(None)` when another holder currently owns the key.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = rand::random::<u64>();
        let acquired = self.kv.set_nx_ex(key, token, ttl).await?;
        Ok(acquired.then(|| LockToken {
            key: key.to_owned(),
            token,
        }))
    }

    /// Acquires the lock, polling every `retry_delay` until `wait_timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`] when the lock could not be acquired within the
    /// wait window; the caller decides whether that is a degraded path or a
    /// retryable failure.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait_timeout: Duration,
        retry_delay: Duration,
    ) -> Result<LockToken> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await? {
                return Ok(token);
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout {
                    key: key.to_owned(),
                });
            }
            sleep(retry_delay).await;
        }
    }

    /// Releases a held lock. Returns `false` when the entry had already
    /// expired and possibly been re-acquired by another holder.
    pub async fn release(&self, token: LockToken) -> Result<bool> {
        Ok(self.kv.del_if_eq(&token.key, token.token).await?)
    }
}

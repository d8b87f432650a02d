//! Cache-aside identifier resolution with stampede protection.
//!
//! The cache maps `(entity kind, external key)` to an internal row id, with
//! a TTL. Absence is never authoritative — it means "unknown or evicted",
//! not "does not exist" — and negative results are never cached, so a
//! subsequently created entity stays discoverable.
//!
//! Cold reads are single-flight: the first caller to miss takes a short-TTL
//! lock and performs the one authoritative-store query on behalf of all
//! concurrent waiters, who poll the cache until it is populated. A waiter
//! whose bounded wait elapses degrades to an uncached authoritative read
//! rather than failing; it deliberately does not write the cache, to avoid
//! double-write races with the still-active lock holder.

use crate::error::Result;
use crate::keys::CacheKey;
use crate::lock::LockManager;
use crate::model::{AppId, ChatId};
use crate::store::{DurableStore, KvStore};
use core::future::Future;
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, sleep};

/// Tunables for the identifier cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a populated entry lives.
    pub entry_ttl: Duration,
    /// TTL on the stampede lock; bounds how long a crashed holder can block
    /// cold reads for one key.
    pub lock_ttl: Duration,
    /// How long a waiter polls for the holder to populate the cache before
    /// degrading to an uncached authoritative read.
    pub lock_wait_timeout: Duration,
    /// Polling interval while waiting on the lock holder.
    pub lock_retry_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(10),
            lock_wait_timeout: Duration::from_secs(5),
            lock_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Resolves external lookup keys to internal row ids through the fast store,
/// falling back to the durable store under a single-flight lock.
pub struct IdentifierCache<S, D> {
    kv: Arc<S>,
    durable: Arc<D>,
    locks: LockManager<S>,
    config: CacheConfig,
}

impl<S, D> Clone for IdentifierCache<S, D> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            durable: Arc::clone(&self.durable),
            locks: self.locks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: KvStore, D: DurableStore> IdentifierCache<S, D> {
    pub fn new(kv: Arc<S>, durable: Arc<D>, config: CacheConfig) -> Self {
        Self {
            locks: LockManager::new(Arc::clone(&kv)),
            kv,
            durable,
            config,
        }
    }

    /// Resolves an application id by public token.
    pub async fn resolve_application_id(&self, token: &str) -> Result<Option<AppId>> {
        let key = CacheKey::application(token);
        self.resolve(&key, || async move {
            Ok(self.durable.application_id_by_token(token).await?)
        })
        .await
    }

    /// Resolves a chat id by `(application token, chat number)`.
    pub async fn resolve_chat_id(&self, token: &str, number: u64) -> Result<Option<ChatId>> {
        let key = CacheKey::chat(token, number);
        self.resolve(&key, || async move {
            Ok(self
                .durable
                .chat_id_by_token_and_number(token, number)
                .await?)
        })
        .await
    }

    /// Write-through population, used eagerly by the write path so readers
    /// that immediately follow a creation hit the cache.
    pub async fn populate(&self, key: &CacheKey, id: u64) -> Result<()> {
        self.kv
            .set_ex(&key.cache_key(), id, self.config.entry_ttl)
            .await?;
        Ok(())
    }

    /// Drops an entry. Present entries must always refer to live ids, so
    /// deletion paths invalidate rather than leave entries dangling.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.kv.del(&key.cache_key()).await?;
        Ok(())
    }

    async fn resolve<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Option<u64>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<u64>>>,
    {
        let cache_key = key.cache_key();
        if let Some(id) = self.kv.get(&cache_key).await? {
            return Ok(Some(id));
        }
        self.fetch_with_lock(key, fetch).await
    }

    /// The cold-read path: single-flight fetch under a short-TTL lock.
    async fn fetch_with_lock<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Option<u64>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<u64>>>,
    {
        let cache_key = key.cache_key();
        let lock_key = key.lock_key();
        let deadline = Instant::now() + self.config.lock_wait_timeout;

        loop {
            if let Some(lock) = self
                .locks
                .try_acquire(&lock_key, self.config.lock_ttl)
                .await?
            {
                // A previous holder may have populated the entry while we
                // were waiting for the lock.
                let already = self.kv.get(&cache_key).await;
                let result = match already {
                    Ok(Some(id)) => Ok(Some(id)),
                    Ok(None) => match fetch().await {
                        Ok(Some(id)) => self
                            .kv
                            .set_ex(&cache_key, id, self.config.entry_ttl)
                            .await
                            .map(|()| Some(id))
                            .map_err(Into::into),
                        other => other,
                    },
                    Err(err) => Err(err.into()),
                };
                // Release on every exit path; a failed release just leaves
                // the lock to expire on its TTL.
                let _ = self.locks.release(lock).await;
                return result;
            }

            // Another caller holds the lock: wait, then see whether it
            // populated the entry.
            sleep(self.config.lock_retry_delay).await;
            if let Some(id) = self.kv.get(&cache_key).await? {
                return Ok(Some(id));
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    key = %cache_key,
                    "cache lock wait timed out, falling back to authoritative store"
                );
                // Uncached fallback: let the still-active holder own the
                // cache write.
                return fetch().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKv, MemoryStore};

    fn test_config() -> CacheConfig {
        CacheConfig {
            entry_ttl: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(2),
            lock_wait_timeout: Duration::from_millis(500),
            lock_retry_delay: Duration::from_millis(10),
        }
    }

    fn cache_fixture() -> (
        Arc<MemoryKv>,
        Arc<MemoryStore>,
        IdentifierCache<MemoryKv, MemoryStore>,
    ) {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(MemoryStore::new());
        let cache = IdentifierCache::new(Arc::clone(&kv), Arc::clone(&store), test_config());
        (kv, store, cache)
    }

    #[tokio::test]
    async fn cold_miss_fetches_once_then_serves_from_cache() {
        let (_, store, cache) = cache_fixture();
        let app = store.insert_application("demo", "tok123").await.unwrap();

        let resolved = cache.resolve_application_id("tok123").await.unwrap();
        assert_eq!(resolved, Some(app.id));
        assert_eq!(store.authoritative_lookups(), 1);

        // Warm reads within the TTL never touch the durable store.
        for _ in 0..5 {
            let resolved = cache.resolve_application_id("tok123").await.unwrap();
            assert_eq!(resolved, Some(app.id));
        }
        assert_eq!(store.authoritative_lookups(), 1);
    }

    #[tokio::test]
    async fn negative_results_are_not_cached() {
        let (_, store, cache) = cache_fixture();

        assert_eq!(cache.resolve_application_id("missing").await.unwrap(), None);
        assert_eq!(cache.resolve_application_id("missing").await.unwrap(), None);
        // Each miss goes back to the store, so a later creation is
        // discoverable.
        assert_eq!(store.authoritative_lookups(), 2);

        let app = store.insert_application("late", "missing").await.unwrap();
        assert_eq!(
            cache.resolve_application_id("missing").await.unwrap(),
            Some(app.id)
        );
    }

    #[tokio::test]
    async fn populate_preempts_authoritative_lookup() {
        let (_, store, cache) = cache_fixture();
        let app = store.insert_application("demo", "tok").await.unwrap();

        cache
            .populate(&CacheKey::application("tok"), app.id)
            .await
            .unwrap();
        assert_eq!(
            cache.resolve_application_id("tok").await.unwrap(),
            Some(app.id)
        );
        assert_eq!(store.authoritative_lookups(), 0);

        cache
            .invalidate(&CacheKey::application("tok"))
            .await
            .unwrap();
        assert_eq!(
            cache.resolve_application_id("tok").await.unwrap(),
            Some(app.id)
        );
        assert_eq!(store.authoritative_lookups(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_cold_lookups_issue_one_authoritative_query() {
        const WAITERS: usize = 16;

        let (_, store, cache) = cache_fixture();
        let app = store.insert_application("demo", "tok").await.unwrap();

        let tasks: Vec<_> = (0..WAITERS)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve_application_id("tok").await.unwrap() })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), Some(app.id));
        }
        assert_eq!(store.authoritative_lookups(), 1);
    }

    #[tokio::test]
    async fn waiter_returns_value_written_by_lock_holder() {
        let (kv, store, cache) = cache_fixture();
        let app = store.insert_application("demo", "tok").await.unwrap();

        // Simulate another process mid-population: it holds the lock and has
        // not yet written the entry.
        let locks = LockManager::new(Arc::clone(&kv));
        let key = CacheKey::application("tok");
        let held = locks
            .try_acquire(&key.lock_key(), Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve_application_id("tok").await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.populate(&key, app.id).await.unwrap();
        locks.release(held).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(app.id));
        // The waiter picked up the holder's write, never querying the store.
        assert_eq!(store.authoritative_lookups(), 0);
    }

    #[tokio::test]
    async fn stalled_holder_degrades_to_uncached_read() {
        let (kv, store, cache) = cache_fixture();
        let app = store.insert_application("demo", "tok").await.unwrap();

        // Holder never populates within the wait window.
        let locks = LockManager::new(Arc::clone(&kv));
        let key = CacheKey::application("tok");
        let _held = locks
            .try_acquire(&key.lock_key(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let resolved = cache.resolve_application_id("tok").await.unwrap();
        assert_eq!(resolved, Some(app.id));
        assert_eq!(store.authoritative_lookups(), 1);
        // The fallback read does not write the cache; that stays with the
        // lock holder.
        assert_eq!(kv.get(&key.cache_key()).await.unwrap(), None);
    }
}

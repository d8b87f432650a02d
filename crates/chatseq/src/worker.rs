//! Idempotent materialization of allocated numbers into durable rows.
//!
//! Jobs arrive at least once, possibly concurrently across worker
//! instances. Effectively-exactly-once row creation rests on three layers,
//! weakest to strongest:
//!
//! 1. delivery-level dedup in the queue (suppresses near-duplicate
//!    enqueues; see [`MaterializeQueue`]);
//! 2. an execution lock per `(parent, number)` (keeps concurrently
//!    executing duplicates from racing inside this step);
//! 3. the durable store's uniqueness constraint — the sole arbiter. The
//!    first two are defense in depth; correctness never depends on them.
//!
//! Side effects are ordered: row insert commits first, counter increment
//! second, cache population / index write last. A crash between steps
//! leaves state the reconciler (counter) or a later reindex pass (search)
//! can repair; none of the later steps roll back the row.
//!
//! [`MaterializeQueue`]: crate::MaterializeQueue

use crate::cache::IdentifierCache;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::job::{JobOutcome, MaterializeJob};
use crate::keys::CacheKey;
use crate::lock::LockManager;
use crate::model::{AppId, ChatId};
use crate::store::{DurableStore, InsertError, KvStore};
use core::time::Duration;
use std::sync::Arc;

/// Tunables for the worker's execution lock.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// TTL on the per-`(parent, number)` execution lock; bounds how long a
    /// crashed execution can block redundant deliveries of the same job.
    pub lock_ttl: Duration,
    /// How long an execution waits for a concurrent duplicate to finish
    /// before giving up and letting the delivery layer retry.
    pub lock_wait_timeout: Duration,
    /// Polling interval while waiting on the execution lock.
    pub lock_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_wait_timeout: Duration::from_secs(5),
            lock_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Consumes materialization jobs and creates durable rows exactly once in
/// effect.
pub struct MaterializationWorker<S, D, X> {
    durable: Arc<D>,
    index: Arc<X>,
    cache: IdentifierCache<S, D>,
    locks: LockManager<S>,
    config: WorkerConfig,
}

impl<S, D, X> Clone for MaterializationWorker<S, D, X> {
    fn clone(&self) -> Self {
        Self {
            durable: Arc::clone(&self.durable),
            index: Arc::clone(&self.index),
            cache: self.cache.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, D, X> MaterializationWorker<S, D, X>
where
    S: KvStore,
    D: DurableStore,
    X: SearchIndex,
{
    pub fn new(
        kv: Arc<S>,
        durable: Arc<D>,
        index: Arc<X>,
        cache: IdentifierCache<S, D>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            durable,
            index,
            cache,
            locks: LockManager::new(kv),
            config,
        }
    }

    /// Executes one delivery of `job`.
    ///
    /// Terminal conditions (`AlreadyExists`, `Dropped`) return `Ok` so the
    /// delivery layer acknowledges the job; only transient failures
    /// propagate for retry with backoff.
    pub async fn execute(&self, job: &MaterializeJob) -> Result<JobOutcome> {
        // Serialize redundant deliveries of the identical (parent, number)
        // pair. A timeout here is retryable: the holder either finishes
        // (the retry lands on the already-exists path) or its lock expires.
        let lock = self
            .locks
            .acquire(
                &job.lock_key(),
                self.config.lock_ttl,
                self.config.lock_wait_timeout,
                self.config.lock_retry_delay,
            )
            .await?;

        let result = match job {
            MaterializeJob::Chat {
                application_id,
                number,
            } => self.materialize_chat(*application_id, *number).await,
            MaterializeJob::Message {
                chat_id,
                number,
                body,
            } => self.materialize_message(*chat_id, *number, body).await,
        };

        // Release on every exit path; a failed release leaves the lock to
        // expire on its TTL.
        let _ = self.locks.release(lock).await;
        result
    }

    async fn materialize_chat(&self, application_id: AppId, number: u64) -> Result<JobOutcome> {
        if let Some(chat) = self
            .durable
            .chat_by_parent_and_number(application_id, number)
            .await?
        {
            tracing::info!(application_id, number = chat.number, "chat already materialized");
            return Ok(JobOutcome::AlreadyExists {
                number: chat.number,
            });
        }

        let chat = match self.durable.insert_chat(application_id, number).await {
            Ok(chat) => chat,
            Err(InsertError::Duplicate { .. }) => {
                // A concurrent execution won the race; idempotent success.
                tracing::warn!(application_id, number, "chat already exists, treating as success");
                return Ok(JobOutcome::AlreadyExists { number });
            }
            Err(InsertError::ParentMissing { parent_id }) => {
                tracing::error!(application_id = parent_id, number, "application not found, dropping job");
                return Ok(JobOutcome::Dropped);
            }
            Err(err @ InsertError::Unavailable(_)) => return Err(err.into()),
        };

        // Dedicated atomic increment; a failure here propagates for retry,
        // and the retry's already-exists path leaves the repair to the
        // reconciler.
        self.durable.increment_chats_count(application_id).await?;

        // Eager cache population so readers that follow the creation hit the
        // cache. Best effort: the entry would otherwise be populated lazily.
        match self.durable.application_by_id(application_id).await {
            Ok(Some(app)) => {
                let key = CacheKey::chat(app.token, number);
                if let Err(err) = self.cache.populate(&key, chat.id).await {
                    tracing::warn!(application_id, number, %err, "failed to cache chat id");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(application_id, number, %err, "failed to load application for cache population");
            }
        }

        tracing::info!(application_id, number, chat_id = chat.id, "chat materialized");
        Ok(JobOutcome::Created { number })
    }

    async fn materialize_message(
        &self,
        chat_id: ChatId,
        number: u64,
        body: &str,
    ) -> Result<JobOutcome> {
        if let Some(message) = self
            .durable
            .message_by_parent_and_number(chat_id, number)
            .await?
        {
            tracing::info!(chat_id, number = message.number, "message already materialized");
            return Ok(JobOutcome::AlreadyExists {
                number: message.number,
            });
        }

        let message = match self.durable.insert_message(chat_id, number, body).await {
            Ok(message) => message,
            Err(InsertError::Duplicate { .. }) => {
                tracing::warn!(chat_id, number, "message already exists, treating as success");
                return Ok(JobOutcome::AlreadyExists { number });
            }
            Err(InsertError::ParentMissing { parent_id }) => {
                tracing::error!(chat_id = parent_id, number, "chat not found, dropping job");
                return Ok(JobOutcome::Dropped);
            }
            Err(err @ InsertError::Unavailable(_)) => return Err(err.into()),
        };

        self.durable.increment_messages_count(chat_id).await?;

        // Index write is last and best effort: its failure never rolls back
        // the row or the counter, and a later reindex pass picks it up.
        if let Err(err) = self.index.upsert_message(&message).await {
            tracing::error!(chat_id, number, %err, "search index upsert failed, continuing");
        }

        tracing::info!(chat_id, number, message_id = message.id, "message materialized");
        Ok(JobOutcome::Created { number })
    }
}

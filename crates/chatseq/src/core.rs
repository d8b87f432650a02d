//! The assembled messaging core.
//!
//! [`MessagingCore`] wires the four components together behind the
//! operations a request-handling layer consumes. Creation is asynchronous:
//! the caller gets an allocated number and a job handle immediately, and the
//! row materializes later. Reads resolve parents through the identifier
//! cache and serve from the durable store; readers must treat "highest
//! number seen" as eventually consistent, since materialization order is
//! not allocation order.

use crate::cache::{CacheConfig, IdentifierCache};
use crate::error::{Error, Result};
use crate::index::SearchIndex;
use crate::job::{JobHandle, MaterializeJob};
use crate::keys::{CacheKey, ParentKey};
use crate::model::{ApplicationRecord, ChatRecord, MessageRecord, generate_token};
use crate::queue::{MaterializeQueue, QueueConfig};
use crate::reconcile::{CountReconciler, ReconcileReport};
use crate::sequence::SequenceAllocator;
use crate::store::{DurableStore, KvStore};
use crate::worker::{MaterializationWorker, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top-level tunables, one section per component.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
}

/// The caller-visible result of an accepted creation: the public number is
/// final immediately, the row itself materializes asynchronously. `job` is
/// `None` when an identical materialization was already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCreation {
    pub number: u64,
    pub job: Option<JobHandle>,
}

/// The messaging core: sequence allocation, cached identifier resolution,
/// asynchronous materialization, and counter reconciliation over injected
/// store handles.
pub struct MessagingCore<S, D, X> {
    durable: Arc<D>,
    index: Arc<X>,
    allocator: SequenceAllocator<S>,
    cache: IdentifierCache<S, D>,
    queue: MaterializeQueue,
    reconciler: CountReconciler<D>,
}

impl<S, D, X> MessagingCore<S, D, X>
where
    S: KvStore,
    D: DurableStore,
    X: SearchIndex,
{
    /// Assembles the core and spawns its delivery pool. Must be called
    /// within a Tokio runtime.
    pub fn new(kv: Arc<S>, durable: Arc<D>, index: Arc<X>, config: CoreConfig) -> Self {
        let cache = IdentifierCache::new(Arc::clone(&kv), Arc::clone(&durable), config.cache);
        let executor = MaterializationWorker::new(
            Arc::clone(&kv),
            Arc::clone(&durable),
            Arc::clone(&index),
            cache.clone(),
            config.worker,
        );
        Self {
            allocator: SequenceAllocator::new(Arc::clone(&kv)),
            queue: MaterializeQueue::start(executor, config.queue),
            reconciler: CountReconciler::new(Arc::clone(&durable)),
            cache,
            durable,
            index,
        }
    }

    /// Creates an application synchronously (no numbering involved) and
    /// eagerly caches its token mapping.
    pub async fn create_application(&self, name: &str) -> Result<ApplicationRecord> {
        let token = generate_token();
        let app = self.durable.insert_application(name, &token).await?;
        let key = CacheKey::application(&app.token);
        if let Err(err) = self.cache.populate(&key, app.id).await {
            tracing::warn!(token = %app.token, %err, "failed to cache application id");
        }
        Ok(app)
    }

    pub async fn get_application(&self, token: &str) -> Result<ApplicationRecord> {
        let id = self
            .cache
            .resolve_application_id(token)
            .await?
            .ok_or_else(|| Error::not_found("application", token))?;
        self.durable
            .application_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("application", token))
    }

    /// Renames an application synchronously. The token is immutable: all
    /// external addressing, sequence counters, and cache entries keyed on it
    /// stay valid across renames.
    pub async fn update_application(&self, token: &str, name: &str) -> Result<ApplicationRecord> {
        let id = self
            .cache
            .resolve_application_id(token)
            .await?
            .ok_or_else(|| Error::not_found("application", token))?;
        self.durable
            .update_application_name(id, name)
            .await?
            .ok_or_else(|| Error::not_found("application", token))
    }

    /// Allocates the next chat number and enqueues its materialization.
    /// Fire-and-forget: returns as soon as the number is reserved.
    pub async fn create_chat(&self, token: &str) -> Result<PendingCreation> {
        let application_id = self
            .cache
            .resolve_application_id(token)
            .await?
            .ok_or_else(|| Error::not_found("application", token))?;

        let number = self
            .allocator
            .allocate(&ParentKey::application(token))
            .await?;
        let job = self
            .queue
            .enqueue(MaterializeJob::Chat {
                application_id,
                number,
            })
            .await?;
        Ok(PendingCreation { number, job })
    }

    pub async fn get_chat(&self, token: &str, number: u64) -> Result<ChatRecord> {
        let id = self
            .cache
            .resolve_chat_id(token, number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{number}")))?;
        self.durable
            .chat_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{number}")))
    }

    /// Chats of an application, ordered by number. Gaps and out-of-order
    /// materialization are normal while jobs are in flight.
    pub async fn list_chats(&self, token: &str) -> Result<Vec<ChatRecord>> {
        let app = self.get_application(token).await?;
        Ok(self.durable.list_chats(app.id).await?)
    }

    /// Allocates the next message number in a chat and enqueues its
    /// materialization.
    pub async fn create_message(
        &self,
        token: &str,
        chat_number: u64,
        body: &str,
    ) -> Result<PendingCreation> {
        let chat_id = self
            .cache
            .resolve_chat_id(token, chat_number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{chat_number}")))?;

        let number = self
            .allocator
            .allocate(&ParentKey::chat(token, chat_number))
            .await?;
        let job = self
            .queue
            .enqueue(MaterializeJob::Message {
                chat_id,
                number,
                body: body.to_owned(),
            })
            .await?;
        Ok(PendingCreation { number, job })
    }

    pub async fn get_message(
        &self,
        token: &str,
        chat_number: u64,
        number: u64,
    ) -> Result<MessageRecord> {
        let chat_id = self
            .cache
            .resolve_chat_id(token, chat_number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{chat_number}")))?;
        self.durable
            .message_by_parent_and_number(chat_id, number)
            .await?
            .ok_or_else(|| Error::not_found("message", format!("{token}/{chat_number}/{number}")))
    }

    pub async fn list_messages(&self, token: &str, chat_number: u64) -> Result<Vec<MessageRecord>> {
        let chat_id = self
            .cache
            .resolve_chat_id(token, chat_number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{chat_number}")))?;
        Ok(self.durable.list_messages(chat_id).await?)
    }

    /// Synchronous body edit of an already-materialized message, re-indexed
    /// best effort.
    pub async fn update_message(
        &self,
        token: &str,
        chat_number: u64,
        number: u64,
        body: &str,
    ) -> Result<MessageRecord> {
        let chat_id = self
            .cache
            .resolve_chat_id(token, chat_number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{chat_number}")))?;
        let message = self
            .durable
            .update_message_body(chat_id, number, body)
            .await?
            .ok_or_else(|| Error::not_found("message", format!("{token}/{chat_number}/{number}")))?;

        if let Err(err) = self.index.upsert_message(&message).await {
            tracing::error!(chat_id, number, %err, "search index upsert failed, continuing");
        }
        Ok(message)
    }

    /// Word-start search over one chat's messages. Blank queries match
    /// nothing. Unlike the write-side index upsert, an unavailable sink here
    /// is a caller-visible error.
    pub async fn search_messages(
        &self,
        token: &str,
        chat_number: u64,
        query: &str,
    ) -> Result<Vec<MessageRecord>> {
        let chat_id = self
            .cache
            .resolve_chat_id(token, chat_number)
            .await?
            .ok_or_else(|| Error::not_found("chat", format!("{token}/{chat_number}")))?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.index.search_messages(chat_id, query).await?)
    }

    /// Runs one counter-reconciliation pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile().await
    }

    /// The reconciler handle, for schedulers that run it periodically.
    pub fn reconciler(&self) -> &CountReconciler<D> {
        &self.reconciler
    }

    /// The allocator handle, for operator tooling (counter restore).
    pub fn allocator(&self) -> &SequenceAllocator<S> {
        &self.allocator
    }

    /// Jobs accepted but not yet executed.
    pub fn pending_jobs(&self) -> usize {
        self.queue.pending_jobs()
    }

    /// Gracefully drains and stops the delivery pool. New creations fail
    /// after this returns; reads keep working.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

//! In-process at-least-once job delivery.
//!
//! [`MaterializeQueue`] stands in for an external job queue: bounded MPSC
//! channels feed a pool of delivery tasks in round-robin order, retryable
//! failures are retried with exponential backoff, and a per-job dedup key
//! suppresses near-duplicate enqueues while a job is pending ("until
//! executed"). Delivery-level dedup is deliberately separate from the
//! worker's own execution lock: the former cuts redundant work, the latter
//! protects concurrently executing duplicates, and neither is load-bearing
//! for correctness — the durable store's uniqueness constraint is.
//!
//! Callers are fire-and-forget: they receive a [`JobHandle`] at enqueue time
//! and never learn the outcome; failures are handled entirely by the
//! retry/drop policy here.

use crate::error::{Error, Result};
use crate::index::SearchIndex;
use crate::job::{JobHandle, MaterializeJob};
use crate::store::{DurableStore, KvStore};
use crate::worker::MaterializationWorker;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Retry-with-backoff policy for jobs that raise retryable errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total execution attempts before a job is dropped with an error log.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub base_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

/// Tunables for the delivery pool.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of delivery tasks.
    pub num_workers: usize,
    /// Bounded channel capacity per delivery task.
    pub buffer_size: usize,
    pub retry: RetryPolicy,
    /// How long shutdown waits for each delivery task to acknowledge.
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            buffer_size: 64,
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

enum WorkRequest {
    Deliver(Delivery),
    Shutdown { response: oneshot::Sender<()> },
}

struct Delivery {
    handle: JobHandle,
    job: MaterializeJob,
    dedup_key: String,
}

/// A cooperative pool of delivery tasks processing materialization jobs.
pub struct MaterializeQueue {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    next_job_id: AtomicU64,
    pending: Arc<Mutex<HashSet<String>>>,
    shutdown_token: CancellationToken,
    shutdown_grace: Duration,
}

impl MaterializeQueue {
    /// Spawns the delivery pool. Must be called within a Tokio runtime.
    pub fn start<S, D, X>(
        executor: MaterializationWorker<S, D, X>,
        config: QueueConfig,
    ) -> Self
    where
        S: KvStore,
        D: DurableStore,
        X: SearchIndex,
    {
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let shutdown_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(config.num_workers);

        for worker_id in 0..config.num_workers {
            let (tx, rx) = mpsc::channel(config.buffer_size);
            tokio::spawn(delivery_loop(
                worker_id,
                rx,
                executor.clone(),
                config.retry.clone(),
                Arc::clone(&pending),
                shutdown_token.clone(),
            ));
            workers.push(tx);
        }

        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            next_job_id: AtomicU64::new(0),
            pending,
            shutdown_token,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Accepts a job for asynchronous execution.
    ///
    /// Returns `None` when an identical job (same dedup key) is already
    /// pending; the suppressed enqueue is logged and the caller may treat
    /// the in-flight job as its own.
    pub async fn enqueue(&self, job: MaterializeJob) -> Result<Option<JobHandle>> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::DependencyUnavailable {
                context: "materialize queue is shut down".into(),
            });
        }

        let dedup_key = job.dedup_key();
        if !self.pending.lock().insert(dedup_key.clone()) {
            tracing::debug!(key = %dedup_key, "duplicate enqueue suppressed");
            return Ok(None);
        }

        let handle = JobHandle(self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1);
        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let delivery = Delivery {
            handle,
            job,
            dedup_key: dedup_key.clone(),
        };

        if self.workers[worker_idx]
            .send(WorkRequest::Deliver(delivery))
            .await
            .is_err()
        {
            self.pending.lock().remove(&dedup_key);
            return Err(Error::DependencyUnavailable {
                context: format!("delivery worker {worker_idx} channel closed"),
            });
        }
        Ok(Some(handle))
    }

    /// Number of jobs accepted but not yet executed to completion.
    pub fn pending_jobs(&self) -> usize {
        self.pending.lock().len()
    }

    /// Gracefully shuts down the pool: refuses new enqueues, lets queued
    /// deliveries drain, interrupts retry backoffs, and waits up to the
    /// grace period per worker for acknowledgement.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();

        let mut acks = Vec::with_capacity(self.workers.len());
        for (worker_id, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if worker.send(WorkRequest::Shutdown { response: tx }).await.is_err() {
                tracing::error!(worker_id, "failed to send shutdown to delivery worker");
            } else {
                acks.push((worker_id, rx));
            }
        }

        let grace = self.shutdown_grace;
        let waits = acks.into_iter().map(|(worker_id, rx)| async move {
            match timeout(grace, rx).await {
                Ok(Ok(())) => tracing::trace!(worker_id, "delivery worker shutdown acknowledged"),
                Ok(Err(_)) => tracing::error!(worker_id, "delivery worker dropped shutdown ack"),
                Err(_) => tracing::warn!(worker_id, "delivery worker shutdown timed out"),
            }
        });
        futures::future::join_all(waits).await;

        tracing::info!("materialize queue shutdown complete");
    }
}

async fn delivery_loop<S, D, X>(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    executor: MaterializationWorker<S, D, X>,
    retry: RetryPolicy,
    pending: Arc<Mutex<HashSet<String>>>,
    shutdown: CancellationToken,
) where
    S: KvStore,
    D: DurableStore,
    X: SearchIndex,
{
    tracing::trace!(worker_id, "delivery worker started");

    while let Some(request) = rx.recv().await {
        match request {
            WorkRequest::Deliver(delivery) => {
                deliver_with_retry(worker_id, &delivery, &executor, &retry, &shutdown).await;
                // "Until executed": the dedup key frees up only once the job
                // reached a terminal state.
                pending.lock().remove(&delivery.dedup_key);
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!(worker_id, "delivery worker received shutdown");
                if response.send(()).is_err() {
                    tracing::error!(worker_id, "delivery worker failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!(worker_id, "delivery worker stopped");
}

async fn deliver_with_retry<S, D, X>(
    worker_id: usize,
    delivery: &Delivery,
    executor: &MaterializationWorker<S, D, X>,
    retry: &RetryPolicy,
    shutdown: &CancellationToken,
) where
    S: KvStore,
    D: DurableStore,
    X: SearchIndex,
{
    let mut attempt = 1u32;
    loop {
        match executor.execute(&delivery.job).await {
            Ok(outcome) => {
                tracing::debug!(worker_id, job = ?delivery.handle, ?outcome, "job executed");
                return;
            }
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                let backoff = retry.backoff_for(attempt);
                tracing::warn!(
                    worker_id,
                    job = ?delivery.handle,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    %err,
                    "job failed, retrying"
                );
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::warn!(worker_id, job = ?delivery.handle, "shutdown during backoff, abandoning job");
                        return;
                    }
                    () = sleep(backoff) => {}
                }
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    worker_id,
                    job = ?delivery.handle,
                    attempt,
                    %err,
                    "job failed permanently, dropping"
                );
                return;
            }
        }
    }
}

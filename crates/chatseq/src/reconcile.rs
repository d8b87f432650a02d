//! Periodic repair of denormalized counters.
//!
//! The worker's increment path optimizes common-case latency; this
//! reconciler guarantees eventual correctness despite partial failures.
//! Both are first-class: neither replaces the other. Reconciliation is a
//! pure corrective overwrite from ground truth — no per-row locking, safe
//! to run concurrently with live traffic and with itself, and a no-op in
//! effect when nothing drifted.

use crate::error::Result;
use crate::store::DurableStore;
use core::time::Duration;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Applications whose `chats_count` was corrected.
    pub applications_corrected: u64,
    /// Chats whose `messages_count` was corrected.
    pub chats_corrected: u64,
}

/// Recomputes every denormalized counter from the true durable child count.
pub struct CountReconciler<D> {
    durable: Arc<D>,
}

impl<D> Clone for CountReconciler<D> {
    fn clone(&self) -> Self {
        Self {
            durable: Arc::clone(&self.durable),
        }
    }
}

impl<D: DurableStore> CountReconciler<D> {
    pub fn new(durable: Arc<D>) -> Self {
        Self { durable }
    }

    /// Runs one reconciliation pass: every application's `chats_count` and
    /// every chat's `messages_count` is overwritten with its true value,
    /// including parents with zero children.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let applications_corrected = self.durable.reconcile_chat_counts().await?;
        let chats_corrected = self.durable.reconcile_message_counts().await?;

        let report = ReconcileReport {
            applications_corrected,
            chats_corrected,
        };
        if applications_corrected > 0 || chats_corrected > 0 {
            tracing::info!(
                applications_corrected,
                chats_corrected,
                "reconciled counter drift"
            );
        } else {
            tracing::debug!("reconciliation pass found no drift");
        }
        Ok(report)
    }

    /// Reconciles every `interval` until `shutdown` fires. Pass failures
    /// are logged and do not stop the loop; drift persists only until the
    /// next successful pass.
    pub async fn run_periodic(&self, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("reconciler stopped");
                    return;
                }
                () = sleep(interval) => {}
            }
            if let Err(err) = self.reconcile().await {
                tracing::error!(%err, "reconciliation pass failed");
            }
        }
    }
}

//! Per-parent sequence allocation.
//!
//! Numbers are issued *before* the corresponding row exists: the write path
//! allocates synchronously, enqueues materialization, and returns. The
//! allocator therefore only touches the fast shared store — never the
//! durable store — and relies on the durable store's uniqueness constraint
//! downstream as the final arbiter of whether a number actually
//! materialized.

use crate::error::Result;
use crate::keys::ParentKey;
use crate::store::KvStore;
use std::sync::Arc;

/// Issues the next integer for a parent key.
///
/// Exactly one sequence 1, 2, 3, … is produced per parent under any
/// concurrency pattern: the counter is created with an atomic
/// set-if-absent at 0, then advanced with atomic increments only. Counters
/// live indefinitely and are never decremented.
pub struct SequenceAllocator<S> {
    kv: Arc<S>,
}

impl<S> Clone for SequenceAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
        }
    }
}

impl<S: KvStore> SequenceAllocator<S> {
    pub fn new(kv: Arc<S>) -> Self {
        Self { kv }
    }

    /// Allocates the next number for `parent`.
    ///
    /// Safe under arbitrary concurrent callers for the same parent: two
    /// concurrent first-callers cannot both receive 1. The returned number
    /// is never reissued for this parent.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] when the fast store is unreachable.
    /// Callers must surface this as a hard failure — there is no safe way to
    /// guess a number.
    ///
    /// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
    pub async fn allocate(&self, parent: &ParentKey) -> Result<u64> {
        let key = parent.sequence_key();
        // Create-if-absent at 0, then increment. Both single atomic store
        // operations; the setnx loser simply increments the winner's
        // counter.
        self.kv.set_nx(&key, 0).await?;
        let number = self.kv.incr(&key).await?;
        Ok(number)
    }

    /// Re-seeds a missing counter at `floor` so the next allocation returns
    /// `floor + 1`. A no-op when the counter already exists.
    ///
    /// This is an operator-driven recovery step for fast-store data loss:
    /// if counters are wiped while durable rows already exist, fresh
    /// allocations would collide with persisted numbers and their
    /// materializations would be silently swallowed as duplicates. Run this
    /// with the highest persisted number per parent before readmitting
    /// traffic. Returns whether the counter was re-seeded.
    pub async fn restore(&self, parent: &ParentKey, floor: u64) -> Result<bool> {
        let key = parent.sequence_key();
        Ok(self.kv.set_nx(&key, floor).await?)
    }
}

//! Fast shared key-value store abstraction.
//!
//! This is the contract the core requires from its fast store (Redis or
//! compatible in production, [`MemoryKv`] in tests and the reference
//! daemon): a handful of *single atomic operations*. Sequence counters,
//! identifier-cache entries, and stampede locks are mutated only through
//! these primitives — never via separate read-then-write steps — so no
//! application-level locking is layered on top of them.
//!
//! [`MemoryKv`]: crate::MemoryKv

use core::future::Future;
use core::time::Duration;

/// Error type for fast-store operations.
///
/// The store is either reachable or it is not; there are no partial-failure
/// modes at this level. Callers decide whether unavailability is a hard
/// failure (allocation, lookup) or retryable (materialization).
#[derive(Clone, thiserror::Error, Debug)]
pub enum KvError {
    /// The store could not be reached or the operation did not complete.
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic key-value operations over unsigned integer values.
///
/// Every method is a single atomic operation on the store. Implementations
/// must not decompose any of them into a read followed by a write.
pub trait KvStore: Send + Sync + 'static {
    /// Reads the value at `key`, if present and unexpired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<u64>, KvError>> + Send;

    /// Sets `key` to `value` with an expiry, overwriting any prior value.
    fn set_ex(
        &self,
        key: &str,
        value: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), KvError>> + Send;

    /// Sets `key` to `value` only if absent, without expiry. Returns whether
    /// the key was created by this call.
    fn set_nx(&self, key: &str, value: u64) -> impl Future<Output = Result<bool, KvError>> + Send;

    /// Sets `key` to `value` with an expiry, only if absent. Returns whether
    /// the key was created by this call.
    fn set_nx_ex(
        &self,
        key: &str,
        value: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, KvError>> + Send;

    /// Atomically increments the value at `key` by one and returns the new
    /// value. A missing key is treated as 0.
    fn incr(&self, key: &str) -> impl Future<Output = Result<u64, KvError>> + Send;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn del(&self, key: &str) -> impl Future<Output = Result<(), KvError>> + Send;

    /// Deletes `key` only if it currently holds `value`. Returns whether a
    /// deletion occurred.
    ///
    /// Used for fenced lock release: a holder whose lock already expired and
    /// was re-acquired by someone else must not delete the new holder's
    /// entry.
    fn del_if_eq(
        &self,
        key: &str,
        value: u64,
    ) -> impl Future<Output = Result<bool, KvError>> + Send;
}

//! Error types for the messaging core.
//!
//! This module defines the central [`Error`] enum, which captures every
//! reportable failure class in the system and encodes its handling policy:
//!
//! - `StoreUnavailable`: the fast shared store or the durable store is
//!   unreachable. A hard failure for allocation and lookups; retryable for
//!   materialization jobs.
//! - `NotFound`: a referenced parent is missing. At materialization time the
//!   job is dropped permanently (retrying cannot help).
//! - `DuplicateCreation`: a uniqueness violation on insert. Treated as
//!   success by the worker, logged at warn.
//! - `DependencyUnavailable`: a best-effort downstream (cache store, search
//!   sink) is down. Logged; never fails the primary operation.
//! - `LockTimeout`: a bounded lock wait elapsed. Inside the cache this is a
//!   degraded path (uncached fallback read); inside the worker it is
//!   retryable.

use crate::index::IndexError;
use crate::store::{InsertError, KvError, StoreError};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the messaging core.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The sequence/cache store or the durable store is unreachable.
    #[error("store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// A referenced entity does not exist.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A row for this `(parent, number)` pair already exists.
    #[error("duplicate creation for parent {parent_id}, number {number}")]
    DuplicateCreation { parent_id: u64, number: u64 },

    /// A best-effort downstream dependency is unavailable.
    #[error("dependency unavailable: {context}")]
    DependencyUnavailable { context: String },

    /// A bounded lock acquisition wait elapsed.
    #[error("lock wait timed out for key {key}")]
    LockTimeout { key: String },
}

impl Error {
    /// Whether the asynchronous delivery layer should retry a job that
    /// surfaced this error.
    ///
    /// Only transient conditions qualify: unreachable stores and contended
    /// execution locks. `NotFound` and `DuplicateCreation` are terminal by
    /// design, and `DependencyUnavailable` never escapes the worker's
    /// side-effect steps in the first place.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::LockTimeout { .. }
        )
    }

    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}

impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Unavailable(context) => Self::StoreUnavailable { context },
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(context) => Self::StoreUnavailable { context },
        }
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(context) => Self::DependencyUnavailable { context },
        }
    }
}

impl From<InsertError> for Error {
    fn from(err: InsertError) -> Self {
        match err {
            InsertError::Duplicate { parent_id, number } => {
                Self::DuplicateCreation { parent_id, number }
            }
            InsertError::ParentMissing { parent_id } => Self::NotFound {
                kind: "parent",
                key: parent_id.to_string(),
            },
            InsertError::Unavailable(context) => Self::StoreUnavailable { context },
        }
    }
}

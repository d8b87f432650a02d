//! Durable relational store abstraction.
//!
//! The durable store is the single source of truth. The core requires three
//! non-negotiable capabilities from it:
//!
//! - **create with unique constraint** on `(parent id, number)` — the final
//!   idempotency backstop for materialization. All idempotency reasoning in
//!   the worker is built on top of this constraint, not instead of it.
//! - **dedicated atomic counter increment** — an in-store "add 1 to this
//!   column" primitive, independent of read-modify-write, so concurrent
//!   workers cannot lose updates.
//! - **bulk aggregate-and-overwrite** — recompute every denormalized counter
//!   from a child-count aggregation in one corrective pass.
//!
//! [`MemoryStore`] is the reference implementation; production deployments
//! supply an adapter over their relational database.
//!
//! [`MemoryStore`]: crate::MemoryStore

use crate::model::{AppId, ApplicationRecord, ChatId, ChatRecord, MessageRecord};
use core::future::Future;

/// Error type for durable-store reads and non-insert writes.
#[derive(Clone, thiserror::Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the operation did not complete.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// Error type for row inserts, separating the two constraint violations the
/// worker's idempotency logic depends on from plain unavailability.
#[derive(Clone, thiserror::Error, Debug)]
pub enum InsertError {
    /// A row with this `(parent_id, number)` already exists. A concurrent
    /// execution won the race; the loser treats this as success.
    #[error("row already exists for parent {parent_id}, number {number}")]
    Duplicate { parent_id: u64, number: u64 },

    /// The parent row does not exist. Terminal: retrying cannot help.
    #[error("parent {parent_id} does not exist")]
    ParentMissing { parent_id: u64 },

    /// The store could not be reached. Retryable.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// Operations the core needs from the durable relational store.
pub trait DurableStore: Send + Sync + 'static {
    /// Inserts an application row with a caller-supplied token.
    fn insert_application(
        &self,
        name: &str,
        token: &str,
    ) -> impl Future<Output = Result<ApplicationRecord, StoreError>> + Send;

    /// Authoritative lookup of an application id by token.
    fn application_id_by_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<AppId>, StoreError>> + Send;

    fn application_by_id(
        &self,
        id: AppId,
    ) -> impl Future<Output = Result<Option<ApplicationRecord>, StoreError>> + Send;

    /// Overwrites an application's name. The token is immutable. Returns the
    /// updated row, or `None` if no such application exists.
    fn update_application_name(
        &self,
        id: AppId,
        name: &str,
    ) -> impl Future<Output = Result<Option<ApplicationRecord>, StoreError>> + Send;

    /// Authoritative lookup of a chat id by `(application token, number)`.
    fn chat_id_by_token_and_number(
        &self,
        token: &str,
        number: u64,
    ) -> impl Future<Output = Result<Option<ChatId>, StoreError>> + Send;

    fn chat_by_id(
        &self,
        id: ChatId,
    ) -> impl Future<Output = Result<Option<ChatRecord>, StoreError>> + Send;

    /// Inserts a chat row; the store enforces `(application_id, number)`
    /// uniqueness and parent existence.
    fn insert_chat(
        &self,
        application_id: AppId,
        number: u64,
    ) -> impl Future<Output = Result<ChatRecord, InsertError>> + Send;

    fn chat_by_parent_and_number(
        &self,
        application_id: AppId,
        number: u64,
    ) -> impl Future<Output = Result<Option<ChatRecord>, StoreError>> + Send;

    /// Inserts a message row; the store enforces `(chat_id, number)`
    /// uniqueness and parent existence.
    fn insert_message(
        &self,
        chat_id: ChatId,
        number: u64,
        body: &str,
    ) -> impl Future<Output = Result<MessageRecord, InsertError>> + Send;

    fn message_by_parent_and_number(
        &self,
        chat_id: ChatId,
        number: u64,
    ) -> impl Future<Output = Result<Option<MessageRecord>, StoreError>> + Send;

    /// Overwrites a message body. Returns the updated row, or `None` if no
    /// such message exists.
    fn update_message_body(
        &self,
        chat_id: ChatId,
        number: u64,
        body: &str,
    ) -> impl Future<Output = Result<Option<MessageRecord>, StoreError>> + Send;

    /// Atomically adds one to an application's `chats_count`.
    fn increment_chats_count(
        &self,
        application_id: AppId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically adds one to a chat's `messages_count`.
    fn increment_messages_count(
        &self,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Chats of an application, ordered by number.
    fn list_chats(
        &self,
        application_id: AppId,
    ) -> impl Future<Output = Result<Vec<ChatRecord>, StoreError>> + Send;

    /// Messages of a chat, ordered by number.
    fn list_messages(
        &self,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, StoreError>> + Send;

    /// Overwrites every application's `chats_count` with its true chat
    /// count, including applications with zero chats. Returns how many rows
    /// changed.
    fn reconcile_chat_counts(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Overwrites every chat's `messages_count` with its true message count,
    /// including chats with zero messages. Returns how many rows changed.
    fn reconcile_message_counts(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

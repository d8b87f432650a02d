//! Best-effort search index sink.
//!
//! The index is a downstream consumer of successful row commits, never a
//! participant in them: an unavailable sink must not affect row durability
//! or counter maintenance. Failed upserts are logged and left for a later
//! reindex pass.

use crate::model::{ChatId, MessageRecord};
use core::future::Future;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type for index operations.
#[derive(Clone, thiserror::Error, Debug)]
pub enum IndexError {
    /// The sink could not be reached or rejected the write.
    #[error("search index unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous, best-effort message indexing.
pub trait SearchIndex: Send + Sync + 'static {
    /// Upserts a message's content. Idempotent: re-indexing the same message
    /// overwrites the previous document.
    fn upsert_message(
        &self,
        message: &MessageRecord,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Word-start search over message bodies within one chat, ordered by
    /// message number.
    fn search_messages(
        &self,
        chat_id: ChatId,
        query: &str,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, IndexError>> + Send;
}

/// An in-memory index for tests and the reference daemon.
#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<BTreeMap<u64, MessageRecord>>,
    unavailable: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable sink. Every subsequent operation fails with
    /// [`IndexError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(IndexError::Unavailable(
                "memory index marked unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl SearchIndex for MemoryIndex {
    async fn upsert_message(&self, message: &MessageRecord) -> Result<(), IndexError> {
        self.check_available()?;
        self.documents.lock().insert(message.id, message.clone());
        Ok(())
    }

    async fn search_messages(
        &self,
        chat_id: ChatId,
        query: &str,
    ) -> Result<Vec<MessageRecord>, IndexError> {
        self.check_available()?;
        let query = query.trim().to_lowercase();
        // A blank query would word-start-match every document.
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<_> = self
            .documents
            .lock()
            .values()
            .filter(|message| message.chat_id == chat_id)
            .filter(|message| {
                message
                    .body
                    .to_lowercase()
                    .split_whitespace()
                    .any(|word| word.starts_with(&query))
            })
            .cloned()
            .collect();
        hits.sort_by_key(|message| message.number);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64, chat_id: u64, number: u64, body: &str) -> MessageRecord {
        MessageRecord {
            id,
            chat_id,
            number,
            body: body.to_owned(),
        }
    }

    #[tokio::test]
    async fn search_matches_word_starts_within_one_chat() {
        let index = MemoryIndex::new();
        index
            .upsert_message(&message(1, 5, 1, "hello world"))
            .await
            .unwrap();
        index
            .upsert_message(&message(2, 5, 2, "help wanted"))
            .await
            .unwrap();
        index
            .upsert_message(&message(3, 6, 1, "hello from elsewhere"))
            .await
            .unwrap();

        let hits = index.search_messages(5, "hel").await.unwrap();
        let numbers: Vec<_> = hits.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 2]);

        // Mid-word matches do not count.
        assert!(index.search_messages(5, "orld").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_queries_match_nothing() {
        let index = MemoryIndex::new();
        index
            .upsert_message(&message(1, 5, 1, "hello world"))
            .await
            .unwrap();

        assert!(index.search_messages(5, "").await.unwrap().is_empty());
        assert!(index.search_messages(5, "   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_previous_document() {
        let index = MemoryIndex::new();
        index
            .upsert_message(&message(1, 5, 1, "draft"))
            .await
            .unwrap();
        index
            .upsert_message(&message(1, 5, 1, "final"))
            .await
            .unwrap();

        assert_eq!(index.len(), 1);
        let hits = index.search_messages(5, "final").await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}

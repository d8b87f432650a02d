//! In-memory [`DurableStore`] implementation.
//!
//! A single `parking_lot` mutex guards all tables, which gives every trait
//! operation the atomicity the contract demands (unique-constraint inserts,
//! dedicated counter increments, bulk reconciliation) without further
//! ceremony. Authoritative lookups are counted so tests can assert the
//! cache's stampede bound.

use crate::model::{AppId, ApplicationRecord, ChatId, ChatRecord, MessageId, MessageRecord};
use crate::store::durable::{DurableStore, InsertError, StoreError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
struct Tables {
    applications: BTreeMap<AppId, ApplicationRecord>,
    token_index: HashMap<String, AppId>,
    chats: BTreeMap<ChatId, ChatRecord>,
    chat_unique: HashMap<(AppId, u64), ChatId>,
    messages: BTreeMap<MessageId, MessageRecord>,
    message_unique: HashMap<(ChatId, u64), MessageId>,
    next_app_id: AppId,
    next_chat_id: ChatId,
    next_message_id: MessageId,
}

/// An in-memory durable store for tests and the reference daemon.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    authoritative_lookups: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store. Every subsequent operation fails with
    /// [`StoreError::Unavailable`] / [`InsertError::Unavailable`] until
    /// reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many authoritative id lookups (`application_id_by_token`,
    /// `chat_id_by_token_and_number`) have been issued. Used by tests to
    /// verify cache stampede protection.
    pub fn authoritative_lookups(&self) -> u64 {
        self.authoritative_lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "memory store marked unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl DurableStore for MemoryStore {
    async fn insert_application(
        &self,
        name: &str,
        token: &str,
    ) -> Result<ApplicationRecord, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        tables.next_app_id += 1;
        let record = ApplicationRecord {
            id: tables.next_app_id,
            token: token.to_owned(),
            name: name.to_owned(),
            chats_count: 0,
        };
        tables.token_index.insert(token.to_owned(), record.id);
        tables.applications.insert(record.id, record.clone());
        Ok(record)
    }

    async fn application_id_by_token(&self, token: &str) -> Result<Option<AppId>, StoreError> {
        self.check_available()?;
        self.authoritative_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().token_index.get(token).copied())
    }

    async fn application_by_id(&self, id: AppId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().applications.get(&id).cloned())
    }

    async fn update_application_name(
        &self,
        id: AppId,
        name: &str,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let Some(app) = tables.applications.get_mut(&id) else {
            return Ok(None);
        };
        app.name = name.to_owned();
        Ok(Some(app.clone()))
    }

    async fn chat_id_by_token_and_number(
        &self,
        token: &str,
        number: u64,
    ) -> Result<Option<ChatId>, StoreError> {
        self.check_available()?;
        self.authoritative_lookups.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock();
        let Some(app_id) = tables.token_index.get(token) else {
            return Ok(None);
        };
        Ok(tables.chat_unique.get(&(*app_id, number)).copied())
    }

    async fn chat_by_id(&self, id: ChatId) -> Result<Option<ChatRecord>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().chats.get(&id).cloned())
    }

    async fn insert_chat(&self, application_id: AppId, number: u64) -> Result<ChatRecord, InsertError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InsertError::Unavailable(
                "memory store marked unavailable".into(),
            ));
        }
        let mut tables = self.tables.lock();
        if !tables.applications.contains_key(&application_id) {
            return Err(InsertError::ParentMissing {
                parent_id: application_id,
            });
        }
        if tables.chat_unique.contains_key(&(application_id, number)) {
            return Err(InsertError::Duplicate {
                parent_id: application_id,
                number,
            });
        }
        tables.next_chat_id += 1;
        let record = ChatRecord {
            id: tables.next_chat_id,
            application_id,
            number,
            messages_count: 0,
        };
        tables.chat_unique.insert((application_id, number), record.id);
        tables.chats.insert(record.id, record.clone());
        Ok(record)
    }

    async fn chat_by_parent_and_number(
        &self,
        application_id: AppId,
        number: u64,
    ) -> Result<Option<ChatRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .chat_unique
            .get(&(application_id, number))
            .and_then(|id| tables.chats.get(id))
            .cloned())
    }

    async fn insert_message(
        &self,
        chat_id: ChatId,
        number: u64,
        body: &str,
    ) -> Result<MessageRecord, InsertError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InsertError::Unavailable(
                "memory store marked unavailable".into(),
            ));
        }
        let mut tables = self.tables.lock();
        if !tables.chats.contains_key(&chat_id) {
            return Err(InsertError::ParentMissing { parent_id: chat_id });
        }
        if tables.message_unique.contains_key(&(chat_id, number)) {
            return Err(InsertError::Duplicate {
                parent_id: chat_id,
                number,
            });
        }
        tables.next_message_id += 1;
        let record = MessageRecord {
            id: tables.next_message_id,
            chat_id,
            number,
            body: body.to_owned(),
        };
        tables.message_unique.insert((chat_id, number), record.id);
        tables.messages.insert(record.id, record.clone());
        Ok(record)
    }

    async fn message_by_parent_and_number(
        &self,
        chat_id: ChatId,
        number: u64,
    ) -> Result<Option<MessageRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .message_unique
            .get(&(chat_id, number))
            .and_then(|id| tables.messages.get(id))
            .cloned())
    }

    async fn update_message_body(
        &self,
        chat_id: ChatId,
        number: u64,
        body: &str,
    ) -> Result<Option<MessageRecord>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let Some(id) = tables.message_unique.get(&(chat_id, number)).copied() else {
            return Ok(None);
        };
        let Some(message) = tables.messages.get_mut(&id) else {
            return Ok(None);
        };
        message.body = body.to_owned();
        Ok(Some(message.clone()))
    }

    async fn increment_chats_count(&self, application_id: AppId) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(app) = self.tables.lock().applications.get_mut(&application_id) {
            app.chats_count += 1;
        }
        Ok(())
    }

    async fn increment_messages_count(&self, chat_id: ChatId) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(chat) = self.tables.lock().chats.get_mut(&chat_id) {
            chat.messages_count += 1;
        }
        Ok(())
    }

    async fn list_chats(&self, application_id: AppId) -> Result<Vec<ChatRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut chats: Vec<_> = tables
            .chats
            .values()
            .filter(|chat| chat.application_id == application_id)
            .cloned()
            .collect();
        chats.sort_by_key(|chat| chat.number);
        Ok(chats)
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<MessageRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut messages: Vec<_> = tables
            .messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| message.number);
        Ok(messages)
    }

    async fn reconcile_chat_counts(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let mut true_counts: HashMap<AppId, u64> = HashMap::new();
        for chat in tables.chats.values() {
            *true_counts.entry(chat.application_id).or_default() += 1;
        }
        let mut changed = 0;
        for app in tables.applications.values_mut() {
            let truth = true_counts.get(&app.id).copied().unwrap_or(0);
            if app.chats_count != truth {
                app.chats_count = truth;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn reconcile_message_counts(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let mut true_counts: HashMap<ChatId, u64> = HashMap::new();
        for message in tables.messages.values() {
            *true_counts.entry(message.chat_id).or_default() += 1;
        }
        let mut changed = 0;
        for chat in tables.chats.values_mut() {
            let truth = true_counts.get(&chat.id).copied().unwrap_or(0);
            if chat.messages_count != truth {
                chat.messages_count = truth;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_chat_enforces_uniqueness_and_parent() {
        let store = MemoryStore::new();
        let app = store.insert_application("demo", "tok").await.unwrap();

        let chat = store.insert_chat(app.id, 1).await.unwrap();
        assert_eq!(chat.number, 1);

        let dup = store.insert_chat(app.id, 1).await;
        assert!(matches!(dup, Err(InsertError::Duplicate { number: 1, .. })));

        let orphan = store.insert_chat(999, 1).await;
        assert!(matches!(
            orphan,
            Err(InsertError::ParentMissing { parent_id: 999 })
        ));
    }

    #[tokio::test]
    async fn listings_are_ordered_by_number() {
        let store = MemoryStore::new();
        let app = store.insert_application("demo", "tok").await.unwrap();
        // Materialization order is not allocation order; listings must sort.
        for number in [3, 1, 2] {
            store.insert_chat(app.id, number).await.unwrap();
        }
        let numbers: Vec<_> = store
            .list_chats(app.id)
            .await
            .unwrap()
            .into_iter()
            .map(|chat| chat.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn authoritative_lookups_are_counted() {
        let store = MemoryStore::new();
        store.insert_application("demo", "tok").await.unwrap();
        assert_eq!(store.authoritative_lookups(), 0);
        store.application_id_by_token("tok").await.unwrap();
        store.chat_id_by_token_and_number("tok", 1).await.unwrap();
        assert_eq!(store.authoritative_lookups(), 2);
    }
}

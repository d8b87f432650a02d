//! Durable entity records.
//!
//! These are the rows the materialization path creates and the read path
//! serves. The `chats_count` and `messages_count` fields are denormalized
//! counters: derived data, incremented by the worker on successful creation
//! and overwritten from ground truth by the reconciler.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub type AppId = u64;
pub type ChatId = u64;
pub type MessageId = u64;

/// An application: the root entity under which chats are numbered.
///
/// The `token` is the application's public identifier, generated once at
/// creation and immutable thereafter. All external addressing (sequence
/// counters, cache entries, API lookups) goes through the token, never the
/// internal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: AppId,
    pub token: String,
    pub name: String,
    /// Denormalized count of chats. Eventually consistent with the true
    /// number of chat rows; repaired by the reconciler.
    pub chats_count: u64,
}

/// A chat, uniquely identified by `(application_id, number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub application_id: AppId,
    pub number: u64,
    /// Denormalized count of messages. Eventually consistent; repaired by
    /// the reconciler.
    pub messages_count: u64,
}

/// A message, uniquely identified by `(chat_id, number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub number: u64,
    pub body: String,
}

/// Generates a fresh application token: 16 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes[..]);
    let mut token = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(token, "{byte:02x}");
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }
}

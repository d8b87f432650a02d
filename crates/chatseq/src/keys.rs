//! Key construction for the fast shared store.
//!
//! Sequence counters, cache entries, and stampede locks are all sharded by an
//! opaque, stable external identifier: an application's public token, or an
//! `(application token, chat number)` pair. Key layouts are fixed so that
//! independent processes (allocators, workers, reconcilers) agree on them
//! without coordination.

use core::fmt;

/// The sharding key for a sequence counter: the parent whose children are
/// being numbered.
///
/// Parent keys are never reused across different internal rows — application
/// tokens are generated once and immutable, and chat numbers are never
/// reissued for the same application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentKey {
    /// Chats are numbered per application.
    Application { token: String },
    /// Messages are numbered per chat, addressed externally by
    /// `(application token, chat number)`.
    Chat { token: String, number: u64 },
}

impl ParentKey {
    pub fn application(token: impl Into<String>) -> Self {
        Self::Application {
            token: token.into(),
        }
    }

    pub fn chat(token: impl Into<String>, number: u64) -> Self {
        Self::Chat {
            token: token.into(),
            number,
        }
    }

    /// The fast-store key holding this parent's sequence counter.
    pub fn sequence_key(&self) -> String {
        match self {
            Self::Application { token } => format!("application:{token}:chat_seq"),
            Self::Chat { token, number } => format!("chat:{token}:{number}:msg_seq"),
        }
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application { token } => write!(f, "application {token}"),
            Self::Chat { token, number } => write!(f, "chat {token}/{number}"),
        }
    }
}

/// An identifier-cache entry key: `(entity kind, external key)` mapped to an
/// internal row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Application id by public token.
    Application { token: String },
    /// Chat id by `(application token, chat number)`.
    Chat { token: String, number: u64 },
}

impl CacheKey {
    pub fn application(token: impl Into<String>) -> Self {
        Self::Application {
            token: token.into(),
        }
    }

    pub fn chat(token: impl Into<String>, number: u64) -> Self {
        Self::Chat {
            token: token.into(),
            number,
        }
    }

    /// The fast-store key holding the cached id.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Application { token } => format!("app:token:{token}:id"),
            Self::Chat { token, number } => format!("chat:{token}:{number}:id"),
        }
    }

    /// The ephemeral mutual-exclusion key serializing cold-cache population
    /// for this entry.
    pub fn lock_key(&self) -> String {
        format!("{}:lock", self.cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_key_layouts_are_stable() {
        let app = ParentKey::application("tok123");
        assert_eq!(app.sequence_key(), "application:tok123:chat_seq");

        let chat = ParentKey::chat("tok123", 7);
        assert_eq!(chat.sequence_key(), "chat:tok123:7:msg_seq");
    }

    #[test]
    fn cache_key_layouts_are_stable() {
        let app = CacheKey::application("tok123");
        assert_eq!(app.cache_key(), "app:token:tok123:id");
        assert_eq!(app.lock_key(), "app:token:tok123:id:lock");

        let chat = CacheKey::chat("tok123", 7);
        assert_eq!(chat.cache_key(), "chat:tok123:7:id");
        assert_eq!(chat.lock_key(), "chat:tok123:7:id:lock");
    }
}

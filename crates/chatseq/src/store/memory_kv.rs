//! In-memory [`KvStore`] implementation.
//!
//! Backed by a single `parking_lot` mutex, which makes every operation
//! trivially atomic. Expiry is lazy: entries are checked against their
//! deadline on access rather than evicted by a background task.

use crate::store::kv::{KvError, KvStore};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

struct Entry {
    value: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// An in-memory fast store for tests and the reference daemon.
///
/// Production deployments point the core at a shared networked store; this
/// implementation exists so the whole system can run and be exercised in a
/// single process.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store. Every subsequent operation fails with
    /// [`KvError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(KvError::Unavailable("memory kv marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    /// Reads through expiry: returns the live value at `key`, dropping the
    /// entry if its deadline passed.
    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<u64> {
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }
}

impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<u64>, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        Ok(Self::live_value(&mut entries, key, Instant::now()))
    }

    async fn set_ex(&self, key: &str, value: u64, ttl: Duration) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: u64) -> Result<bool, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn set_nx_ex(&self, key: &str, value: u64, ttl: Duration) -> Result<bool, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<u64, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let next = Self::live_value(&mut entries, key, now).unwrap_or(0) + 1;
        // Increment preserves any existing expiry, like Redis INCR.
        match entries.get_mut(key) {
            Some(entry) => entry.value = next,
            None => {
                entries.insert(
                    key.to_owned(),
                    Entry {
                        value: next,
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, value: u64) -> Result<bool, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if Self::live_value(&mut entries, key, now) == Some(value) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

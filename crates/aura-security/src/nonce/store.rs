//! Nonce storage backends.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StorageError;

/// Storage for consumed nonces.
///
/// Implementations must make [`mark_if_unused`](NonceStore::mark_if_unused)
/// atomic per key: two concurrent calls for the same live key must not both
/// return `true`.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Record `key` with expiry `expires_at_ms` unless a live entry exists.
    ///
    /// Returns `true` if the key was newly recorded, `false` if it was
    /// already present and unexpired at `now_ms`. An entry is live up to and
    /// including its expiry instant.
    async fn mark_if_unused(&self, key: &str, expires_at_ms: i64, now_ms: i64) -> Result<bool, StorageError>;

    /// True if a live entry for `key` exists at `now_ms`.
    ///
    /// Probabilistic stores may return false positives, never false
    /// negatives for keys recorded within their retention period.
    async fn contains(&self, key: &str, now_ms: i64) -> Result<bool, StorageError>;

    /// Drop entries whose expiry is before `now_ms`. Returns how many were
    /// dropped.
    async fn evict_expired(&self, now_ms: i64) -> Result<usize, StorageError>;

    /// Drop everything.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Number of retained entries (approximate for probabilistic stores).
    async fn len(&self) -> Result<usize, StorageError>;

    /// Longest time after `mark_if_unused` that a key is guaranteed to be
    /// remembered, or `None` if the store honors any `expires_at_ms`.
    fn max_retention_ms(&self) -> Option<i64> {
        None
    }
}

/// In-process map from nonce key to expiry, with lazy eviction on lookup.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryNonceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn mark_if_unused(&self, key: &str, expires_at_ms: i64, now_ms: i64) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(&expiry) if expiry >= now_ms => Ok(false),
            _ => {
                entries.insert(key.to_owned(), expires_at_ms);
                Ok(true)
            }
        }
    }

    async fn contains(&self, key: &str, now_ms: i64) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(&expiry) if expiry >= now_ms => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn evict_expired(&self, now_ms: i64) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry >= now_ms);
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().len())
    }
}

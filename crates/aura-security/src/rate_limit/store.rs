//! Bucket storage backends.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::bucket::BucketState;
use crate::error::StorageError;

/// Read-modify-write step applied to a bucket under the store's lock.
pub type BucketUpdate<'a> = &'a mut (dyn FnMut(Option<BucketState>) -> BucketState + Send);

/// Storage for per-identifier buckets.
///
/// [`update`](RateLimitStore::update) must apply the step atomically per
/// key so concurrent checks on one identifier cannot both spend the same
/// token.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Apply `update` to the live bucket for `key` (or `None` if absent or
    /// expired at `now_ms`), store the result with expiry `expires_at_ms`
    /// and return it.
    async fn update(
        &self,
        key: &str,
        expires_at_ms: i64,
        now_ms: i64,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, StorageError>;

    /// The live bucket for `key`, if any.
    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<BucketState>, StorageError>;

    /// Forget one bucket.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Forget all buckets.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Drop buckets whose expiry is before `now_ms`. Returns how many.
    async fn evict_expired(&self, now_ms: i64) -> Result<usize, StorageError>;

    /// Number of stored buckets.
    async fn len(&self) -> Result<usize, StorageError>;
}

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    expires_at_ms: i64,
}

/// Sharded in-process bucket map.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    buckets: DashMap<String, StoredBucket>,
}

impl MemoryRateLimitStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn update(
        &self,
        key: &str,
        expires_at_ms: i64,
        now_ms: i64,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, StorageError> {
        let next = match self.buckets.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                let stored = *entry.get();
                let prior = (stored.expires_at_ms >= now_ms).then_some(stored.state);
                let next = update(prior);
                entry.insert(StoredBucket {
                    state: next,
                    expires_at_ms,
                });
                next
            }
            Entry::Vacant(entry) => {
                let next = update(None);
                entry.insert(StoredBucket {
                    state: next,
                    expires_at_ms,
                });
                next
            }
        };
        Ok(next)
    }

    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<BucketState>, StorageError> {
        Ok(self
            .buckets
            .get(key)
            .filter(|b| b.expires_at_ms >= now_ms)
            .map(|b| b.state))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.buckets.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.buckets.clear();
        Ok(())
    }

    async fn evict_expired(&self, now_ms: i64) -> Result<usize, StorageError> {
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.expires_at_ms >= now_ms);
        Ok(before.saturating_sub(self.buckets.len()))
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.buckets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(tokens: f64) -> BucketState {
        BucketState {
            tokens,
            last_refill_ms: 0,
            violations: 0,
        }
    }

    #[tokio::test]
    async fn update_sees_prior_state() {
        let store = MemoryRateLimitStore::new();
        let mut seen = Vec::new();
        let mut step = |prior: Option<BucketState>| {
            seen.push(prior.map(|s| s.tokens));
            state(prior.map_or(5.0, |s| s.tokens - 1.0))
        };
        store.update("a", 100, 0, &mut step).await.unwrap();
        store.update("a", 100, 10, &mut step).await.unwrap();
        assert_eq!(seen, vec![None, Some(5.0)]);
        assert_eq!(store.get("a", 10).await.unwrap(), Some(state(4.0)));
    }

    #[tokio::test]
    async fn expired_bucket_is_treated_as_absent() {
        let store = MemoryRateLimitStore::new();
        store.update("a", 100, 0, &mut |_| state(0.0)).await.unwrap();
        assert!(store.get("a", 101).await.unwrap().is_none());
        let mut prior_seen = Some(state(-1.0));
        store
            .update("a", 300, 101, &mut |prior| {
                prior_seen = prior;
                state(1.0)
            })
            .await
            .unwrap();
        assert!(prior_seen.is_none());
    }

    #[tokio::test]
    async fn evict_and_clear() {
        let store = MemoryRateLimitStore::new();
        store.update("a", 100, 0, &mut |_| state(1.0)).await.unwrap();
        store.update("b", 200, 0, &mut |_| state(1.0)).await.unwrap();
        assert_eq!(store.evict_expired(150).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        store.remove("b").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        store.update("c", 200, 0, &mut |_| state(1.0)).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }
}

//! # Admission Control
//!
//! Token-bucket rate limiting per identifier. Each identifier owns a bucket
//! that starts full at `burst_capacity` and refills continuously at
//! `max_requests / window_ms` tokens per millisecond.
//!
//! A check always performs refill, decision, backoff computation and a
//! store write, whether it accepts or rejects, and is wrapped in a random
//! delay on both sides (see [`JitterConfig`]). Callers cannot learn the
//! remaining capacity from response timing.
//!
//! [`CompositeRateLimiter`] evaluates several named tiers at once and
//! rejects if any of them does.

mod bucket;
mod composite;
mod jitter;
mod store;

use std::sync::Arc;
use std::time::Duration;

use aura_core::{BackgroundTask, Clock, SystemClock};
use serde::{Deserialize, Serialize};

pub use bucket::{backoff_ms, evaluate, refill_rate_per_ms, replenish, Admission, BucketState};
pub use composite::{CompositeRateLimiter, TierScope};
pub use jitter::JitterConfig;
pub use store::{BucketUpdate, MemoryRateLimitStore, RateLimitStore};

use crate::error::{RateLimitError, StorageError};

/// Token-bucket parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests replenished per window.
    pub max_requests: u32,
    /// Replenishment window.
    pub window_ms: u64,
    /// Bucket size; the most requests admitted back to back.
    pub burst_capacity: u32,
    /// Double the backoff on each consecutive violation.
    pub exponential_backoff: bool,
    /// Backoff unit.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Background eviction period.
    pub cleanup_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            burst_capacity: 100,
            exponential_backoff: true,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    /// How long an idle bucket is kept. A bucket idle this long has
    /// refilled completely, so forgetting it changes nothing.
    pub fn bucket_ttl_ms(&self) -> i64 {
        i64::try_from(self.window_ms.saturating_mul(2)).unwrap_or(i64::MAX)
    }
}

/// Per-identifier token-bucket limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    jitter: JitterConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// In-memory limiter on the system clock with default jitter.
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(
            config,
            JitterConfig::default(),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Limiter over an explicit store and clock.
    pub fn new(
        config: RateLimitConfig,
        jitter: JitterConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            jitter,
            clock,
            store,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Spend `cost` tokens from `identifier`'s bucket.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] with a retry-after when the bucket is
    /// short, [`RateLimitError::InvalidCost`] for a zero cost or one larger
    /// than the bucket, [`RateLimitError::Storage`] if the store fails.
    pub async fn check_limit(&self, identifier: &str, cost: u32) -> Result<(), RateLimitError> {
        if cost == 0 || cost > self.config.burst_capacity {
            return Err(RateLimitError::InvalidCost {
                cost,
                capacity: self.config.burst_capacity,
            });
        }

        self.jitter.pause().await;
        let outcome = self.apply(identifier, cost).await;
        self.jitter.pause().await;

        match outcome? {
            Admission::Allowed { .. } => Ok(()),
            Admission::Rejected {
                retry_after_ms,
                violations,
            } => {
                tracing::warn!(identifier, retry_after_ms, violations, "rate limit exceeded");
                Err(RateLimitError::Exceeded {
                    identifier: identifier.to_owned(),
                    tier: None,
                    retry_after_ms,
                })
            }
        }
    }

    async fn apply(&self, identifier: &str, cost: u32) -> Result<Admission, RateLimitError> {
        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(self.config.bucket_ttl_ms());
        let config = &self.config;
        let mut admission = None;
        self.store
            .update(identifier, expires_at, now, &mut |prior| {
                let (next, decided) = evaluate(prior, cost, now, config);
                admission = Some(decided);
                next
            })
            .await?;
        admission.ok_or_else(|| StorageError::Corrupt(format!("bucket update for {identifier:?} not applied")).into())
    }

    /// Tokens currently available to `identifier`, after refill.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn get_remaining_capacity(&self, identifier: &str) -> Result<f64, RateLimitError> {
        let now = self.clock.now_millis();
        let capacity = self.config.burst_capacity;
        Ok(match self.store.get(identifier, now).await? {
            Some(state) => replenish(&state, now, refill_rate_per_ms(&self.config), capacity),
            None => f64::from(capacity),
        })
    }

    /// Restore `identifier`'s bucket to full.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        Ok(self.store.remove(identifier).await?)
    }

    /// Forget every bucket.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn clear(&self) -> Result<(), RateLimitError> {
        Ok(self.store.clear().await?)
    }

    /// Drop idle buckets. Returns how many.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn cleanup(&self) -> Result<usize, RateLimitError> {
        let dropped = self.store.evict_expired(self.clock.now_millis()).await?;
        if dropped > 0 {
            tracing::debug!(dropped, "evicted idle rate-limit buckets");
        }
        Ok(dropped)
    }

    /// Number of tracked buckets.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn size(&self) -> Result<usize, RateLimitError> {
        Ok(self.store.len().await?)
    }

    /// Run [`cleanup`](Self::cleanup) periodically until the handle is
    /// stopped or dropped.
    pub fn start_cleanup(self: &Arc<Self>) -> BackgroundTask {
        let this = Arc::clone(self);
        BackgroundTask::spawn_periodic(
            "rate-limit-cleanup",
            Duration::from_millis(self.config.cleanup_interval_ms),
            move || {
                let this = Arc::clone(&this);
                async move {
                    if let Err(e) = this.cleanup().await {
                        tracing::warn!(error = %e, "rate limit cleanup failed");
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aura_core::ManualClock;

    pub(super) fn limiter(config: RateLimitConfig, clock: &ManualClock) -> RateLimiter {
        RateLimiter::new(
            config,
            JitterConfig::disabled(),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::new(clock.clone()),
        )
    }

    fn five_per_minute() -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 5,
            window_ms: 60_000,
            burst_capacity: 5,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn admits_burst_then_rejects() {
        let clock = ManualClock::new(1_000_000);
        let l = limiter(five_per_minute(), &clock);
        for _ in 0..5 {
            l.check_limit("client-1", 1).await.unwrap();
        }
        let err = l.check_limit("client-1", 1).await.unwrap_err();
        let retry = err.retry_after().unwrap();
        assert!(retry > Duration::ZERO);
        // One token at 5 per minute takes 12 s.
        assert!((12_000..=12_001).contains(&(retry.as_millis() as u64)));
        assert!(matches!(err, RateLimitError::Exceeded { ref identifier, tier: None, .. } if identifier == "client-1"));
    }

    #[tokio::test]
    async fn identifiers_are_independent() {
        let clock = ManualClock::new(0);
        let l = limiter(five_per_minute(), &clock);
        for _ in 0..5 {
            l.check_limit("a", 1).await.unwrap();
        }
        assert!(l.check_limit("a", 1).await.is_err());
        l.check_limit("b", 1).await.unwrap();
    }

    #[tokio::test]
    async fn refills_over_time() {
        let clock = ManualClock::new(0);
        let l = limiter(five_per_minute(), &clock);
        for _ in 0..5 {
            l.check_limit("a", 1).await.unwrap();
        }
        assert!(l.get_remaining_capacity("a").await.unwrap() < 1e-9);
        clock.advance(12_001);
        assert!((l.get_remaining_capacity("a").await.unwrap() - 1.0).abs() < 1e-3);
        l.check_limit("a", 1).await.unwrap();
        assert!(l.check_limit("a", 1).await.is_err());
    }

    #[tokio::test]
    async fn cost_is_validated() {
        let clock = ManualClock::new(0);
        let l = limiter(five_per_minute(), &clock);
        assert_eq!(
            l.check_limit("a", 0).await.unwrap_err(),
            RateLimitError::InvalidCost { cost: 0, capacity: 5 }
        );
        assert!(matches!(
            l.check_limit("a", 6).await.unwrap_err(),
            RateLimitError::InvalidCost { cost: 6, .. }
        ));
        l.check_limit("a", 5).await.unwrap();
    }

    #[tokio::test]
    async fn repeated_violations_grow_backoff() {
        let clock = ManualClock::new(0);
        let l = limiter(
            RateLimitConfig {
                max_requests: 1_000,
                window_ms: 1_000,
                burst_capacity: 1,
                base_backoff_ms: 100,
                max_backoff_ms: 350,
                ..RateLimitConfig::default()
            },
            &clock,
        );
        l.check_limit("a", 1).await.unwrap();
        let waits: Vec<u64> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                let err = l.check_limit("a", 1).await.unwrap_err();
                v.push(err.retry_after().unwrap().as_millis() as u64);
            }
            v
        };
        assert_eq!(waits, vec![200, 350, 350]);
    }

    #[tokio::test]
    async fn reset_and_clear_restore_capacity() {
        let clock = ManualClock::new(0);
        let l = limiter(five_per_minute(), &clock);
        l.check_limit("a", 5).await.unwrap();
        l.check_limit("b", 5).await.unwrap();
        l.reset("a").await.unwrap();
        assert_eq!(l.get_remaining_capacity("a").await.unwrap(), 5.0);
        l.clear().await.unwrap();
        assert_eq!(l.size().await.unwrap(), 0);
        assert_eq!(l.get_remaining_capacity("b").await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn cleanup_drops_idle_buckets() {
        let clock = ManualClock::new(0);
        let l = limiter(five_per_minute(), &clock);
        l.check_limit("a", 1).await.unwrap();
        clock.advance(120_000);
        assert_eq!(l.cleanup().await.unwrap(), 0);
        clock.advance(1);
        assert_eq!(l.cleanup().await.unwrap(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn update(&self, _: &str, _: i64, _: i64, _: BucketUpdate<'_>) -> Result<BucketState, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn get(&self, _: &str, _: i64) -> Result<Option<BucketState>, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn remove(&self, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
        async fn evict_expired(&self, _: i64) -> Result<usize, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn len(&self) -> Result<usize, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn storage_failure_during_check_propagates() {
        let l = RateLimiter::new(
            five_per_minute(),
            JitterConfig::disabled(),
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(0)),
        );
        assert!(matches!(
            l.check_limit("a", 1).await.unwrap_err(),
            RateLimitError::Storage(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_swallows_errors() {
        let l = Arc::new(RateLimiter::new(
            RateLimitConfig {
                cleanup_interval_ms: 10,
                ..five_per_minute()
            },
            JitterConfig::disabled(),
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(0)),
        ));
        let mut task = l.start_cleanup();
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(task.is_running());
        task.stop();
        assert!(!task.is_running());
    }
}

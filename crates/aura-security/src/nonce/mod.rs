//! # Replay Prevention
//!
//! The [`NonceManager`] accepts each nonce at most once within its
//! acceptance window. The check proceeds in order:
//!
//! 1. Reject a blank nonce.
//! 2. Reject a `created_at` more than `clock_skew_ms` ahead of now.
//! 3. Reject a nonce older than `window_ms`.
//! 4. Atomically record the nonce with expiry `created_at + window_ms`, or
//!    later when the caller asks for a longer retention, rejecting it as a
//!    replay if a live record already exists.
//!
//! Step 4 is a single [`NonceStore::mark_if_unused`] call, so two racing
//! requests carrying the same nonce cannot both be accepted.
//!
//! A nonce embedded in a longer-lived token must be remembered until the
//! token itself expires, otherwise the token becomes acceptable again once
//! the window passes. [`NonceManager::validate_nonce_until`] takes that
//! expiry. Stores with a bounded memory ([`NonceStore::max_retention_ms`])
//! refuse nonces they cannot hold long enough.
//!
//! Storage errors during a check propagate as [`NonceError::Storage`].
//! Storage errors during background cleanup are logged and swallowed.

mod adapter;
mod bloom;
mod store;

use std::sync::Arc;
use std::time::Duration;

use aura_core::{BackgroundTask, Clock, SystemClock};
use serde::{Deserialize, Serialize};

pub use adapter::PresentationNonceAdapter;
pub use bloom::{BloomConfig, BloomNonceStore};
pub use store::{MemoryNonceStore, NonceStore};

use crate::error::NonceError;

/// Nonce acceptance parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long a nonce stays acceptable after creation.
    pub window_ms: i64,
    /// Tolerated clock drift for future-dated nonces.
    pub clock_skew_ms: i64,
    /// Background eviction period.
    pub cleanup_interval_ms: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            clock_skew_ms: 30_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl NonceConfig {
    /// Minimum time a store must retain an accepted nonce.
    pub fn retention_ms(&self) -> i64 {
        self.window_ms.saturating_add(self.clock_skew_ms)
    }
}

/// Replay guard over a pluggable [`NonceStore`].
pub struct NonceManager {
    config: NonceConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn NonceStore>,
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl NonceManager {
    /// Manager backed by an in-memory map and the system clock.
    pub fn in_memory(config: NonceConfig) -> Self {
        Self::new(config, Arc::new(MemoryNonceStore::new()), Arc::new(SystemClock))
    }

    /// Manager backed by a rotating bloom filter sized for `expected_items`
    /// per generation.
    pub fn bloom(
        config: NonceConfig,
        expected_items: usize,
        false_positive_rate: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = BloomNonceStore::for_retention(expected_items, false_positive_rate, config.retention_ms());
        Self::new(config, Arc::new(store), clock)
    }

    /// Manager over an explicit store and clock.
    pub fn new(config: NonceConfig, store: Arc<dyn NonceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, store }
    }

    /// Active configuration.
    pub fn config(&self) -> &NonceConfig {
        &self.config
    }

    /// The clock the manager reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Accept `nonce` created at `created_at_ms`, or say why not.
    ///
    /// # Errors
    ///
    /// See [`NonceError`]. A replay is [`NonceError::Replay`].
    pub async fn validate_nonce(&self, nonce: &str, created_at_ms: i64) -> Result<(), NonceError> {
        let retain_until = created_at_ms.saturating_add(self.config.window_ms);
        self.validate_nonce_until(nonce, created_at_ms, retain_until).await
    }

    /// Like [`validate_nonce`](Self::validate_nonce), but keep the record
    /// until at least `retain_until_ms`.
    ///
    /// # Errors
    ///
    /// As [`validate_nonce`](Self::validate_nonce), plus
    /// [`NonceError::RetentionExceeded`] when the store cannot remember the
    /// nonce that long.
    pub async fn validate_nonce_until(
        &self,
        nonce: &str,
        created_at_ms: i64,
        retain_until_ms: i64,
    ) -> Result<(), NonceError> {
        let key = nonce.trim();
        if key.is_empty() {
            return Err(NonceError::Empty);
        }
        let now = self.clock.now_millis();
        let ahead = created_at_ms.saturating_sub(now);
        if ahead > self.config.clock_skew_ms {
            tracing::warn!(nonce = key, ahead_ms = ahead, "future-dated nonce rejected");
            return Err(NonceError::FromFuture {
                nonce: key.to_owned(),
                ahead_ms: ahead,
                max_skew_ms: self.config.clock_skew_ms,
            });
        }
        let age = now.saturating_sub(created_at_ms);
        if age > self.config.window_ms {
            return Err(NonceError::Expired {
                nonce: key.to_owned(),
                age_ms: age,
                window_ms: self.config.window_ms,
            });
        }
        let expires_at = created_at_ms.saturating_add(self.config.window_ms).max(retain_until_ms);
        if let Some(max_ms) = self.store.max_retention_ms() {
            let required_ms = expires_at.saturating_sub(now);
            if required_ms > max_ms {
                tracing::warn!(nonce = key, required_ms, max_ms, "nonce outlives store retention");
                return Err(NonceError::RetentionExceeded {
                    nonce: key.to_owned(),
                    required_ms,
                    max_ms,
                });
            }
        }
        if self.store.mark_if_unused(key, expires_at, now).await? {
            Ok(())
        } else {
            tracing::warn!(nonce = key, "nonce replay rejected");
            Err(NonceError::Replay {
                nonce: key.to_owned(),
            })
        }
    }

    /// True if `nonce` has a live record.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn has_been_used(&self, nonce: &str) -> Result<bool, NonceError> {
        let key = nonce.trim();
        if key.is_empty() {
            return Ok(false);
        }
        Ok(self.store.contains(key, self.clock.now_millis()).await?)
    }

    /// Evict expired records now. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn cleanup(&self) -> Result<usize, NonceError> {
        let dropped = self.store.evict_expired(self.clock.now_millis()).await?;
        if dropped > 0 {
            tracing::debug!(dropped, "evicted expired nonces");
        }
        Ok(dropped)
    }

    /// Forget every recorded nonce.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn clear(&self) -> Result<(), NonceError> {
        Ok(self.store.clear().await?)
    }

    /// Number of retained records.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn size(&self) -> Result<usize, NonceError> {
        Ok(self.store.len().await?)
    }

    /// Run [`cleanup`](Self::cleanup) every `cleanup_interval_ms` until the
    /// returned handle is stopped or dropped.
    pub fn start_cleanup(self: &Arc<Self>) -> BackgroundTask {
        let this = Arc::clone(self);
        BackgroundTask::spawn_periodic(
            "nonce-cleanup",
            Duration::from_millis(self.config.cleanup_interval_ms),
            move || {
                let this = Arc::clone(&this);
                async move {
                    if let Err(e) = this.cleanup().await {
                        tracing::warn!(error = %e, "nonce cleanup failed");
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

    use crate::error::StorageError;

    const T0: i64 = 1_768_478_400_000;

    fn manager() -> (NonceManager, ManualClock) {
        let clock = ManualClock::new(T0);
        let m = NonceManager::new(
            NonceConfig::default(),
            Arc::new(MemoryNonceStore::new()),
            Arc::new(clock.clone()),
        );
        (m, clock)
    }

    #[tokio::test]
    async fn accepts_then_rejects_replay() {
        let (m, clock) = manager();
        m.validate_nonce("999", T0).await.unwrap();
        clock.advance(10_000);
        let err = m.validate_nonce("999", T0).await.unwrap_err();
        assert!(err.is_replay());
        assert!(m.has_been_used("999").await.unwrap());
    }

    #[tokio::test]
    async fn blank_nonce_rejected() {
        let (m, _) = manager();
        assert_eq!(m.validate_nonce("   ", T0).await.unwrap_err(), NonceError::Empty);
        assert!(!m.has_been_used("").await.unwrap());
    }

    #[tokio::test]
    async fn future_dated_beyond_skew_rejected() {
        let (m, _) = manager();
        assert!(m.validate_nonce("a", T0 + 30_000).await.is_ok());
        let err = m.validate_nonce("b", T0 + 30_001).await.unwrap_err();
        assert!(matches!(err, NonceError::FromFuture { ahead_ms: 30_001, .. }));
    }

    #[tokio::test]
    async fn aged_out_nonce_reports_age() {
        let (m, _) = manager();
        assert!(m.validate_nonce("a", T0 - 300_000).await.is_ok());
        let err = m.validate_nonce("b", T0 - 300_001).await.unwrap_err();
        assert_eq!(
            err,
            NonceError::Expired {
                nonce: "b".into(),
                age_ms: 300_001,
                window_ms: 300_000
            }
        );
    }

    #[tokio::test]
    async fn cleanup_frees_expired_records() {
        let (m, clock) = manager();
        m.validate_nonce("a", T0).await.unwrap();
        m.validate_nonce("b", T0).await.unwrap();
        assert_eq!(m.size().await.unwrap(), 2);
        clock.advance(300_000);
        assert_eq!(m.cleanup().await.unwrap(), 0);
        clock.advance(1);
        assert_eq!(m.cleanup().await.unwrap(), 2);
        assert_eq!(m.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let (m, _) = manager();
        m.validate_nonce("a", T0).await.unwrap();
        m.clear().await.unwrap();
        assert!(m.validate_nonce("a", T0).await.is_ok());
    }

    #[tokio::test]
    async fn bloom_backend_rejects_replay() {
        let clock = ManualClock::new(T0);
        let m = NonceManager::bloom(NonceConfig::default(), 1_000, 0.001, Arc::new(clock.clone()));
        m.validate_nonce("999", T0).await.unwrap();
        clock.advance(300_000);
        assert!(m.validate_nonce("999", T0).await.unwrap_err().is_replay());
    }

    #[tokio::test]
    async fn explicit_retention_outlives_window() {
        let (m, clock) = manager();
        m.validate_nonce_until("pres-1:7", T0, T0 + 3_600_000).await.unwrap();
        clock.advance(300_001);
        let now = clock.now_millis();
        assert!(m.validate_nonce_until("pres-1:7", now, T0 + 3_600_000).await.unwrap_err().is_replay());
        assert_eq!(m.cleanup().await.unwrap(), 0);

        clock.set(T0 + 3_600_001);
        let now = clock.now_millis();
        assert!(m.validate_nonce_until("pres-1:7", now, now).await.is_ok());
    }

    #[tokio::test]
    async fn retention_shorter_than_window_is_ignored() {
        let (m, clock) = manager();
        m.validate_nonce_until("a", T0, T0 + 1).await.unwrap();
        clock.advance(300_000);
        assert!(m.validate_nonce("a", T0).await.unwrap_err().is_replay());
    }

    #[tokio::test]
    async fn bloom_refuses_retention_it_cannot_hold() {
        let clock = ManualClock::new(T0);
        let m = NonceManager::bloom(NonceConfig::default(), 1_000, 0.001, Arc::new(clock.clone()));
        let retention = NonceConfig::default().retention_ms();
        assert!(m.validate_nonce_until("a", T0, T0 + retention).await.is_ok());
        let err = m.validate_nonce_until("b", T0, T0 + retention + 1).await.unwrap_err();
        assert_eq!(
            err,
            NonceError::RetentionExceeded {
                nonce: "b".into(),
                required_ms: retention + 1,
                max_ms: retention,
            }
        );
        assert!(!m.has_been_used("b").await.unwrap());
    }

    struct BrokenStore;

    #[async_trait]
    impl NonceStore for BrokenStore {
        async fn mark_if_unused(&self, _: &str, _: i64, _: i64) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn contains(&self, _: &str, _: i64) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn evict_expired(&self, _: i64) -> Result<usize, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
        async fn len(&self) -> Result<usize, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn storage_error_during_check_is_not_acceptance() {
        let m = NonceManager::new(
            NonceConfig::default(),
            Arc::new(BrokenStore),
            Arc::new(ManualClock::new(T0)),
        );
        let err = m.validate_nonce("1", T0).await.unwrap_err();
        assert!(matches!(err, NonceError::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_swallows_errors() {
        let m = Arc::new(NonceManager::new(
            NonceConfig {
                cleanup_interval_ms: 10,
                ..Default::default()
            },
            Arc::new(BrokenStore),
            Arc::new(ManualClock::new(T0)),
        ));
        let mut task = m.start_cleanup();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_running());
        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_evicts() {
        let clock = ManualClock::new(T0);
        let m = Arc::new(NonceManager::new(
            NonceConfig {
                cleanup_interval_ms: 10,
                ..Default::default()
            },
            Arc::new(MemoryNonceStore::new()),
            Arc::new(clock.clone()),
        ));
        m.validate_nonce("a", T0).await.unwrap();
        let _task = m.start_cleanup();
        clock.advance(300_001);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(m.size().await.unwrap(), 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use aura_core::ManualClock;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn second_use_within_window_is_replay(
            nonce in "[0-9]{1,20}",
            created_offset in -300_000i64..=0,
            delay in 0i64..300_000,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let now = 1_768_478_400_000i64;
                let clock = ManualClock::new(now);
                let m = NonceManager::new(
                    NonceConfig::default(),
                    Arc::new(MemoryNonceStore::new()),
                    Arc::new(clock.clone()),
                );
                let created = now + created_offset;
                m.validate_nonce(&nonce, created).await.unwrap();
                // Stay inside the acceptance window for the second attempt.
                let max_delay = (created + 300_000 - now).max(0);
                clock.advance(delay.min(max_delay));
                let err = m.validate_nonce(&nonce, created).await.unwrap_err();
                assert!(err.is_replay());
            });
        }
    }
}

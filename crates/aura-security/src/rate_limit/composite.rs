//! Several named limiters checked together.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use super::RateLimiter;
use crate::error::{RateLimitError, StorageError};

/// Which bucket a tier charges for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierScope {
    /// One bucket shared by every caller.
    Global,
    /// One bucket per identifier.
    PerIdentifier,
}

#[derive(Debug)]
struct Tier {
    name: String,
    scope: TierScope,
    limiter: Arc<RateLimiter>,
}

/// Tiers evaluated concurrently; any rejection rejects the request.
///
/// Every tier is charged on every check, including when another tier
/// rejects. The reported retry-after is the longest among rejecting tiers.
#[derive(Debug, Default)]
pub struct CompositeRateLimiter {
    tiers: Vec<Tier>,
}

impl CompositeRateLimiter {
    /// No tiers; admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tier.
    #[must_use]
    pub fn with_tier(mut self, name: impl Into<String>, scope: TierScope, limiter: Arc<RateLimiter>) -> Self {
        self.tiers.push(Tier {
            name: name.into(),
            scope,
            limiter,
        });
        self
    }

    /// Tier names in insertion order.
    pub fn tier_names(&self) -> impl Iterator<Item = &str> {
        self.tiers.iter().map(|t| t.name.as_str())
    }

    /// Charge `cost` to every tier for `identifier`.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] naming the tier with the longest wait
    /// if any tier rejects. Other tier errors take precedence over
    /// rejections.
    pub async fn check_limit(&self, identifier: &str, cost: u32) -> Result<(), RateLimitError> {
        let mut set = JoinSet::new();
        for tier in &self.tiers {
            let key = match tier.scope {
                TierScope::Global => tier.name.clone(),
                TierScope::PerIdentifier => format!("{}:{}", tier.name, identifier),
            };
            let limiter = Arc::clone(&tier.limiter);
            let name = tier.name.clone();
            set.spawn(async move { (name, limiter.check_limit(&key, cost).await) });
        }

        let mut worst: Option<(String, u64)> = None;
        let mut failure: Option<RateLimitError> = None;
        while let Some(joined) = set.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    failure.get_or_insert(RateLimitError::Storage(StorageError::Unavailable(format!(
                        "tier check aborted: {e}"
                    ))));
                    continue;
                }
            };
            match result {
                Ok(()) => {}
                Err(RateLimitError::Exceeded { retry_after_ms, .. }) => {
                    if worst.as_ref().map_or(true, |(_, w)| retry_after_ms > *w) {
                        worst = Some((name, retry_after_ms));
                    }
                }
                Err(other) => {
                    failure.get_or_insert(other);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        match worst {
            None => Ok(()),
            Some((tier, retry_after_ms)) => Err(RateLimitError::Exceeded {
                identifier: identifier.to_owned(),
                tier: Some(tier),
                retry_after_ms,
            }),
        }
    }

    /// Reset `identifier`'s bucket in every per-identifier tier.
    ///
    /// # Errors
    ///
    /// Propagates the first storage failure.
    pub async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        for tier in self.tiers.iter().filter(|t| t.scope == TierScope::PerIdentifier) {
            tier.limiter.reset(&format!("{}:{}", tier.name, identifier)).await?;
        }
        Ok(())
    }

    /// Clear every tier.
    ///
    /// # Errors
    ///
    /// Propagates the first storage failure.
    pub async fn clear(&self) -> Result<(), RateLimitError> {
        for tier in &self.tiers {
            tier.limiter.clear().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::tests::limiter;
    use crate::rate_limit::RateLimitConfig;
    use aura_core::ManualClock;

    fn config(burst: u32, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: burst,
            window_ms,
            burst_capacity: burst,
            ..RateLimitConfig::default()
        }
    }

    fn composite(clock: &ManualClock) -> CompositeRateLimiter {
        CompositeRateLimiter::new()
            .with_tier("global", TierScope::Global, Arc::new(limiter(config(4, 60_000), clock)))
            .with_tier("identity", TierScope::PerIdentifier, Arc::new(limiter(config(2, 60_000), clock)))
    }

    #[tokio::test]
    async fn empty_composite_admits() {
        CompositeRateLimiter::new().check_limit("a", 1).await.unwrap();
    }

    #[tokio::test]
    async fn per_identifier_tier_rejects_first() {
        let clock = ManualClock::new(0);
        let c = composite(&clock);
        c.check_limit("alice", 1).await.unwrap();
        c.check_limit("alice", 1).await.unwrap();
        let err = c.check_limit("alice", 1).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { tier: Some(ref t), .. } if t == "identity"));
        assert!(err.to_string().contains("(tier identity)"));
    }

    #[tokio::test]
    async fn global_tier_is_shared_across_identifiers() {
        let clock = ManualClock::new(0);
        let c = composite(&clock);
        c.check_limit("a", 1).await.unwrap();
        c.check_limit("b", 1).await.unwrap();
        c.check_limit("c", 1).await.unwrap();
        c.check_limit("d", 1).await.unwrap();
        let err = c.check_limit("e", 1).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { tier: Some(ref t), .. } if t == "global"));
    }

    #[tokio::test]
    async fn reports_longest_wait() {
        let clock = ManualClock::new(0);
        let c = CompositeRateLimiter::new()
            .with_tier("fast", TierScope::PerIdentifier, Arc::new(limiter(config(1, 1_000), &clock)))
            .with_tier("slow", TierScope::PerIdentifier, Arc::new(limiter(config(1, 600_000), &clock)));
        c.check_limit("a", 1).await.unwrap();
        let err = c.check_limit("a", 1).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { tier: Some(ref t), .. } if t == "slow"));
        assert!(err.retry_after().unwrap().as_millis() >= 600_000);
    }

    #[tokio::test]
    async fn reset_targets_identifier_tiers() {
        let clock = ManualClock::new(0);
        let c = composite(&clock);
        c.check_limit("alice", 2).await.unwrap();
        assert!(c.check_limit("alice", 1).await.is_err());
        c.reset("alice").await.unwrap();
        c.check_limit("alice", 1).await.unwrap();
        assert_eq!(c.tier_names().collect::<Vec<_>>(), vec!["global", "identity"]);
    }
}

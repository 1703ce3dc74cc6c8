//! Error types for replay protection, admission control and threat tracking.

use std::time::Duration;

use thiserror::Error;

/// Failure of a pluggable storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be reached or refused the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("storage record corrupt: {0}")]
    Corrupt(String),
}

/// Nonce rejected by the [`NonceManager`](crate::nonce::NonceManager).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// Blank nonce.
    #[error("nonce must not be empty")]
    Empty,

    /// Creation timestamp too far ahead of the local clock.
    #[error("nonce {nonce:?} created {ahead_ms} ms in the future (max skew {max_skew_ms} ms)")]
    FromFuture {
        /// The nonce key.
        nonce: String,
        /// How far ahead of now `created_at` was.
        ahead_ms: i64,
        /// Configured clock skew allowance.
        max_skew_ms: i64,
    },

    /// Nonce older than the acceptance window.
    #[error("nonce {nonce:?} expired: age {age_ms} ms exceeds window {window_ms} ms")]
    Expired {
        /// The nonce key.
        nonce: String,
        /// Age at the time of the check.
        age_ms: i64,
        /// Configured acceptance window.
        window_ms: i64,
    },

    /// The nonce was already consumed.
    #[error("nonce {nonce:?} has already been used")]
    Replay {
        /// The nonce key.
        nonce: String,
    },

    /// The record would have to outlive what the store can guarantee.
    #[error("nonce {nonce:?} must be retained {required_ms} ms but the store keeps at most {max_ms} ms")]
    RetentionExceeded {
        /// The nonce key.
        nonce: String,
        /// Time from now until the record may be forgotten.
        required_ms: i64,
        /// The store's retention guarantee.
        max_ms: i64,
    },

    /// Storage failed during the check. Never treated as acceptance.
    #[error("nonce storage error: {0}")]
    Storage(#[from] StorageError),
}

impl NonceError {
    /// True for [`NonceError::Replay`].
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay { .. })
    }
}

/// Request refused by a [`RateLimiter`](crate::rate_limit::RateLimiter).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Bucket exhausted.
    #[error("rate limit exceeded for {identifier:?}{}: retry after {retry_after_ms} ms", tier_suffix(.tier))]
    Exceeded {
        /// The limited identifier.
        identifier: String,
        /// Tier name when raised by a composite limiter.
        tier: Option<String>,
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// Cost of zero or above burst capacity.
    #[error("invalid cost {cost} (burst capacity {capacity})")]
    InvalidCost {
        /// Requested cost.
        cost: u32,
        /// Configured burst capacity.
        capacity: u32,
    },

    /// Storage failed during the check.
    #[error("rate limit storage error: {0}")]
    Storage(#[from] StorageError),
}

fn tier_suffix(tier: &Option<String>) -> String {
    tier.as_ref().map(|t| format!(" (tier {t})")).unwrap_or_default()
}

impl RateLimitError {
    /// Retry-after as a duration, if this is an `Exceeded` error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Exceeded { retry_after_ms, .. } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }

    /// Retry-after in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Exceeded { retry_after_ms, .. } => Some(retry_after_ms.div_ceil(1000)),
            _ => None,
        }
    }
}

/// Failure raised by the [`ThreatDetector`](crate::threat::ThreatDetector).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreatError {
    /// The identifier is on the block list.
    #[error("identifier {identifier:?} is blocked")]
    Blocked {
        /// The blocked identifier.
        identifier: String,
    },

    /// Storage failed while tracking.
    #[error("activity storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_display_includes_tier() {
        let err = RateLimitError::Exceeded {
            identifier: "id".into(),
            tier: Some("global".into()),
            retry_after_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "rate limit exceeded for \"id\" (tier global): retry after 1500 ms"
        );
        assert_eq!(err.retry_after_secs(), Some(2));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn rate_limit_display_without_tier() {
        let err = RateLimitError::Exceeded {
            identifier: "id".into(),
            tier: None,
            retry_after_ms: 10,
        };
        assert!(!err.to_string().contains("tier"));
    }

    #[test]
    fn replay_is_distinguishable() {
        assert!(NonceError::Replay { nonce: "1".into() }.is_replay());
        assert!(!NonceError::Empty.is_replay());
        let storage: NonceError = StorageError::Unavailable("down".into()).into();
        assert!(!storage.is_replay());
    }
}

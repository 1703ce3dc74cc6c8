//! Pure token-bucket computation.
//!
//! Every function here is deterministic: time is passed in, nothing is
//! stored. [`evaluate`] runs the same steps whatever the outcome so the
//! work done on an accepted request is indistinguishable from the work done
//! on a rejected one.

use serde::{Deserialize, Serialize};

use super::RateLimitConfig;

/// Persisted state of one identifier's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Available tokens, possibly fractional.
    pub tokens: f64,
    /// When `tokens` was last brought up to date.
    pub last_refill_ms: i64,
    /// Consecutive rejections since the last acceptance.
    pub violations: u32,
}

impl BucketState {
    /// A full bucket as of `now_ms`.
    pub fn full(capacity: u32, now_ms: i64) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill_ms: now_ms,
            violations: 0,
        }
    }
}

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Tokens were consumed.
    Allowed {
        /// Tokens left after consumption.
        remaining: f64,
    },
    /// Not enough tokens.
    Rejected {
        /// Suggested wait before retrying.
        retry_after_ms: u64,
        /// Consecutive rejections including this one.
        violations: u32,
    },
}

impl Admission {
    /// True for [`Admission::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Tokens added per millisecond.
#[inline]
pub fn refill_rate_per_ms(config: &RateLimitConfig) -> f64 {
    if config.window_ms == 0 {
        return 0.0;
    }
    f64::from(config.max_requests) / config.window_ms as f64
}

/// Tokens available at `now_ms`, capped at `capacity`.
///
/// A clock that went backwards adds nothing.
#[inline]
pub fn replenish(state: &BucketState, now_ms: i64, rate_per_ms: f64, capacity: u32) -> f64 {
    let elapsed = now_ms.saturating_sub(state.last_refill_ms).max(0) as f64;
    (state.tokens + elapsed * rate_per_ms).clamp(0.0, f64::from(capacity))
}

/// Backoff for the given violation count.
///
/// Exponential: `min(base × 2^violations, max)`. Otherwise the fixed base.
#[inline]
pub fn backoff_ms(config: &RateLimitConfig, violations: u32) -> u64 {
    if !config.exponential_backoff {
        return config.base_backoff_ms;
    }
    let factor = 1u64 << violations.min(63);
    config.base_backoff_ms.saturating_mul(factor).min(config.max_backoff_ms)
}

/// Milliseconds until `deficit` tokens have been refilled, rounded up.
#[inline]
pub fn refill_wait_ms(deficit: f64, rate_per_ms: f64) -> u64 {
    if deficit <= 0.0 {
        return 0;
    }
    if rate_per_ms <= 0.0 {
        return u64::MAX;
    }
    (deficit / rate_per_ms).ceil() as u64
}

/// One admission step: refill, decide, compute backoff, produce the state
/// to persist.
pub fn evaluate(
    prior: Option<BucketState>,
    cost: u32,
    now_ms: i64,
    config: &RateLimitConfig,
) -> (BucketState, Admission) {
    let state = prior.unwrap_or_else(|| BucketState::full(config.burst_capacity, now_ms));
    let rate = refill_rate_per_ms(config);
    let available = replenish(&state, now_ms, rate, config.burst_capacity);
    let cost = f64::from(cost);

    let allowed = available >= cost;
    let tokens = if allowed { available - cost } else { available };
    let violations = if allowed { 0 } else { state.violations.saturating_add(1) };
    let backoff = backoff_ms(config, violations.max(1));
    let wait = refill_wait_ms(cost - available, rate);

    let next = BucketState {
        tokens,
        last_refill_ms: now_ms.max(state.last_refill_ms),
        violations,
    };
    let admission = if allowed {
        Admission::Allowed { remaining: tokens }
    } else {
        Admission::Rejected {
            retry_after_ms: wait.max(backoff),
            violations,
        }
    };
    (next, admission)
}

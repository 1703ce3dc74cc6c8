//! Randomized delay around the admission check.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounds for the random delay added before and after each check.
///
/// Delays are drawn from the operating system's CSPRNG. Disable for
/// deterministic tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Whether to delay at all.
    pub enabled: bool,
    /// Lower bound, inclusive.
    pub min_ms: u64,
    /// Upper bound, inclusive.
    pub max_ms: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ms: 1,
            max_ms: 10,
        }
    }
}

impl JitterConfig {
    /// Jitter switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Draw one delay. Zero when disabled.
    pub fn sample(&self) -> Duration {
        if !self.enabled || self.max_ms == 0 {
            return Duration::ZERO;
        }
        let lo = self.min_ms.min(self.max_ms);
        Duration::from_millis(OsRng.gen_range(lo..=self.max_ms))
    }

    /// Sleep for one sampled delay.
    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_is_zero() {
        assert_eq!(JitterConfig::disabled().sample(), Duration::ZERO);
    }

    #[test]
    fn samples_stay_in_bounds() {
        let cfg = JitterConfig {
            enabled: true,
            min_ms: 3,
            max_ms: 7,
        };
        for _ in 0..200 {
            let d = cfg.sample().as_millis();
            assert!((3..=7).contains(&d), "{d}");
        }
    }

    #[test]
    fn inverted_bounds_do_not_panic() {
        let cfg = JitterConfig {
            enabled: true,
            min_ms: 9,
            max_ms: 2,
        };
        assert_eq!(cfg.sample(), Duration::from_millis(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_sleeps_for_sample() {
        let cfg = JitterConfig {
            enabled: true,
            min_ms: 5,
            max_ms: 5,
        };
        let start = tokio::time::Instant::now();
        cfg.pause().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

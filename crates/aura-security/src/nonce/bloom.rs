//! Bloom-filter nonce store for high-volume deployments.
//!
//! Memory is fixed by the sizing parameters, independent of how many nonces
//! pass through. A false positive makes a fresh nonce look used (a spurious
//! replay rejection); a recorded nonce is never reported absent while it is
//! retained.
//!
//! ## Rotation
//!
//! A bloom filter cannot forget individual entries, so the store keeps two
//! generations. New keys go into `current`; lookups consult both. Every
//! `rotation_interval_ms` the older generation is discarded and `current`
//! becomes `previous`. A key is therefore retained for at least one full
//! interval and at most two. With the interval set to the nonce window plus
//! clock skew, no key is forgotten while it could still be replayed, and the
//! false-positive rate stays bounded instead of growing for the life of the
//! process.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::store::NonceStore;
use crate::error::StorageError;

/// Sizing and rotation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Keys expected per generation.
    pub expected_items: usize,
    /// Target false-positive rate per generation, in (0, 0.5].
    pub false_positive_rate: f64,
    /// Generation lifetime. Must be at least the nonce window plus skew.
    pub rotation_interval_ms: i64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 100_000,
            false_positive_rate: 0.001,
            rotation_interval_ms: 330_000,
        }
    }
}

#[derive(Debug, Clone)]
struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// m = -n·ln(p) / ln(2)², k = (m/n)·ln(2)
    fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let m = ((-n * p.ln()) / (ln2 * ln2)).ceil() as usize;
        let num_bits = m.max(64).div_ceil(64) * 64;
        let k = ((num_bits as f64 / n) * ln2).round() as u32;
        Self {
            bits: vec![0; num_bits / 64],
            num_bits,
            num_hashes: k.clamp(1, 32),
        }
    }

    fn indexes(&self, key: &str) -> impl Iterator<Item = usize> + '_ {
        let digest = Sha256::digest(key.as_bytes());
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&digest[0..8]);
        b.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(a);
        let h2 = u64::from_le_bytes(b) | 1;
        let m = self.num_bits as u64;
        (0..u64::from(self.num_hashes)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    fn insert(&mut self, key: &str) {
        let idx: Vec<usize> = self.indexes(key).collect();
        for i in idx {
            self.bits[i / 64] |= 1u64 << (i % 64);
        }
    }

    fn might_contain(&self, key: &str) -> bool {
        self.indexes(key).all(|i| self.bits[i / 64] & (1u64 << (i % 64)) != 0)
    }

    fn clear(&mut self) {
        self.bits.fill(0);
    }
}

#[derive(Debug)]
struct Generations {
    current: BloomFilter,
    previous: BloomFilter,
    current_count: usize,
    previous_count: usize,
    rotated_at_ms: Option<i64>,
}

impl Generations {
    fn rotate_if_due(&mut self, now_ms: i64, interval_ms: i64) -> usize {
        let Some(rotated_at) = self.rotated_at_ms else {
            self.rotated_at_ms = Some(now_ms);
            return 0;
        };
        let elapsed = now_ms.saturating_sub(rotated_at);
        if elapsed < interval_ms {
            return 0;
        }
        let dropped = if elapsed >= interval_ms.saturating_mul(2) {
            // Both generations are stale.
            let dropped = self.current_count + self.previous_count;
            self.current.clear();
            self.previous.clear();
            self.current_count = 0;
            self.previous_count = 0;
            dropped
        } else {
            let dropped = self.previous_count;
            std::mem::swap(&mut self.previous, &mut self.current);
            self.current.clear();
            self.previous_count = self.current_count;
            self.current_count = 0;
            dropped
        };
        self.rotated_at_ms = Some(now_ms);
        dropped
    }
}

/// Two-generation rotating bloom filter.
#[derive(Debug)]
pub struct BloomNonceStore {
    config: BloomConfig,
    state: Mutex<Generations>,
}

impl BloomNonceStore {
    /// Store with explicit parameters.
    pub fn new(config: BloomConfig) -> Self {
        let filter = BloomFilter::new(config.expected_items, config.false_positive_rate);
        Self {
            state: Mutex::new(Generations {
                current: filter.clone(),
                previous: filter,
                current_count: 0,
                previous_count: 0,
                rotated_at_ms: None,
            }),
            config,
        }
    }

    /// Store whose rotation interval covers `retention_ms`.
    pub fn for_retention(expected_items: usize, false_positive_rate: f64, retention_ms: i64) -> Self {
        Self::new(BloomConfig {
            expected_items,
            false_positive_rate,
            rotation_interval_ms: retention_ms.max(1),
        })
    }

    /// Active parameters.
    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    /// Bits per generation.
    pub fn bits_per_generation(&self) -> usize {
        self.state.lock().current.num_bits
    }

    /// Hash functions per key.
    pub fn hash_count(&self) -> u32 {
        self.state.lock().current.num_hashes
    }
}

#[async_trait]
impl NonceStore for BloomNonceStore {
    async fn mark_if_unused(&self, key: &str, _expires_at_ms: i64, now_ms: i64) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        state.rotate_if_due(now_ms, self.config.rotation_interval_ms);
        if state.current.might_contain(key) || state.previous.might_contain(key) {
            return Ok(false);
        }
        state.current.insert(key);
        state.current_count += 1;
        Ok(true)
    }

    async fn contains(&self, key: &str, now_ms: i64) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        state.rotate_if_due(now_ms, self.config.rotation_interval_ms);
        Ok(state.current.might_contain(key) || state.previous.might_contain(key))
    }

    async fn evict_expired(&self, now_ms: i64) -> Result<usize, StorageError> {
        let mut state = self.state.lock();
        Ok(state.rotate_if_due(now_ms, self.config.rotation_interval_ms))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.current.clear();
        state.previous.clear();
        state.current_count = 0;
        state.previous_count = 0;
        state.rotated_at_ms = None;
        Ok(())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.lock();
        Ok(state.current_count + state.previous_count)
    }

    fn max_retention_ms(&self) -> Option<i64> {
        Some(self.config.rotation_interval_ms)
    }
}

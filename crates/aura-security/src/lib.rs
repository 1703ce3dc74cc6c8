//! # aura-security: Abuse Resistance
//!
//! The stateful stages of the verification gate. Each component owns its
//! state behind an injectable storage trait, reads time through an injected
//! [`aura_core::Clock`], and exposes a periodic cleanup task.
//!
//! - [`nonce`]: single-use nonce enforcement within an acceptance window,
//!   backed by an exact map or a rotating bloom filter.
//! - [`rate_limit`]: token-bucket admission control with exponential
//!   backoff, timing jitter, and multi-tier composition.
//! - [`threat`]: behavioral detectors (rapid requests, brute force,
//!   geographic anomaly, credential stuffing) with automatic blocking.

pub mod error;
pub mod nonce;
pub mod rate_limit;
pub mod threat;

pub use error::{NonceError, RateLimitError, StorageError, ThreatError};
pub use nonce::{
    BloomConfig, BloomNonceStore, MemoryNonceStore, NonceConfig, NonceManager, NonceStore, PresentationNonceAdapter,
};
pub use rate_limit::{
    CompositeRateLimiter, JitterConfig, MemoryRateLimitStore, RateLimitConfig, RateLimitStore, RateLimiter, TierScope,
};
pub use threat::{
    ActivityRecord, ActivityStore, ActivitySummary, AlertCallback, AlertError, MemoryActivityStore, ThreatConfig,
    ThreatDetector, ThreatEvent, ThreatLevel, ThreatStatistics, ThreatType, TrackRequest,
};

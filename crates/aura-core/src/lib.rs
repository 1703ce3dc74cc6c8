//! # aura-core: Foundational Types for the Verification Gate
//!
//! Every other crate in the workspace depends on `aura-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **`CanonicalBytes` newtype.** Audit chain hashes and presentation
//!    signing payloads are computed over `CanonicalBytes` only. No raw
//!    `serde_json::to_vec()` for digests.
//!
//! 2. **Validated identifier newtypes.** `Did` and `AuraDid` validate their
//!    shape at construction, including during deserialization.
//!
//! 3. **Injected time.** Windows, expirations and refill math read the
//!    current time through a [`Clock`], never through `SystemTime` directly,
//!    so every time-dependent algorithm is deterministic under test.
//!
//! 4. **Untrusted input goes through [`sanitize`].** Length bounds, control
//!    character stripping and injection pattern detection live in one place.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `aura-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod sanitize;
pub mod task;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use digest::{chain_digest, sha256_digest, sha256_hex, ContentDigest, GENESIS_HASH};
pub use error::{CanonicalizationError, IdentifierError, SanitizeError};
pub use identity::{AuraDid, Did};
pub use sanitize::InjectionKind;
pub use task::BackgroundTask;
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};

//! # Content Digests and Hash Chaining
//!
//! SHA-256 digests computed from [`CanonicalBytes`], plus the chaining
//! primitive used by the tamper-evident audit log.
//!
//! ## Security Invariant
//!
//! Digest helpers accept only `&CanonicalBytes`, never raw `&[u8]`, so every
//! hash in the system is computed over the canonical serialization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;

/// Previous-hash value of the first entry in any hash chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A 32-byte SHA-256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    /// The raw 32-byte digest value.
    pub bytes: [u8; 32],
}

impl ContentDigest {
    /// Create a digest from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Render the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

/// Compute a SHA-256 digest from canonical bytes.
pub fn sha256_digest(data: &CanonicalBytes) -> ContentDigest {
    let hash = Sha256::digest(data.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hash);
    ContentDigest::new(bytes)
}

/// Compute a SHA-256 hex string from canonical bytes.
pub fn sha256_hex(data: &CanonicalBytes) -> String {
    sha256_digest(data).to_hex()
}

/// Compute the next link of a hash chain.
///
/// `SHA-256(previous_hash ∥ body)` where `previous_hash` is the hex string of
/// the predecessor's digest (or [`GENESIS_HASH`]) fed in as its ASCII bytes.
pub fn chain_digest(previous_hash: &str, body: &CanonicalBytes) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(body.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    ContentDigest::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_deterministic() {
        let cb = CanonicalBytes::new(&serde_json::json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(sha256_digest(&cb), sha256_digest(&cb));
    }

    #[test]
    fn known_sha256_vector() {
        // SHA256("{}")
        let cb = CanonicalBytes::new(&serde_json::json!({})).unwrap();
        assert_eq!(
            sha256_hex(&cb),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn display_has_algorithm_prefix() {
        let cb = CanonicalBytes::new(&serde_json::json!({"a": 1})).unwrap();
        let s = sha256_digest(&cb).to_string();
        assert!(s.starts_with("sha256:"));
        assert_eq!(s.len(), 7 + 64);
    }

    #[test]
    fn chain_digest_depends_on_previous_hash() {
        let body = CanonicalBytes::new(&serde_json::json!({"msg": "x"})).unwrap();
        let a = chain_digest(GENESIS_HASH, &body);
        let b = chain_digest(&a.to_hex(), &body);
        assert_ne!(a, b);
    }

    #[test]
    fn chain_digest_equals_hash_of_concatenation() {
        let body = CanonicalBytes::new(&serde_json::json!({"k": "v"})).unwrap();
        let mut concat = GENESIS_HASH.as_bytes().to_vec();
        concat.extend_from_slice(body.as_bytes());
        let expected: [u8; 32] = Sha256::digest(&concat).into();
        assert_eq!(chain_digest(GENESIS_HASH, &body).bytes, expected);
    }

    #[test]
    fn genesis_hash_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}

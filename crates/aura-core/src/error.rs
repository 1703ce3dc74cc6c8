//! # Error Types
//!
//! Errors raised by the foundational primitives. Component crates define
//! their own error enums and wrap these where they surface.

use thiserror::Error;

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Error constructing a validated identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// The string is not a `did:<method>:<id>` identifier.
    #[error("invalid DID: {0:?}")]
    InvalidDid(String),

    /// The string is a DID but not of the `did:aura:<network>:<id>` shape.
    #[error("invalid Aura DID {did:?}: {reason}")]
    InvalidAuraDid {
        /// The offending identifier.
        did: String,
        /// Which part of the shape was violated.
        reason: String,
    },
}

/// Untrusted text rejected by the sanitizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    /// Input exceeds the permitted length.
    #[error("input too long: {actual} characters (max {max})")]
    TooLong {
        /// Maximum permitted characters.
        max: usize,
        /// Characters received.
        actual: usize,
    },

    /// Input contains a NUL byte.
    #[error("input contains a NUL byte")]
    NulByte,

    /// Input is not an even-length hexadecimal string.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

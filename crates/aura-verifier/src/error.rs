//! Error types for the verification pipeline.

use aura_audit::AuditError;
use aura_qr::{QrParseError, QrValidationError};
use aura_security::{RateLimitError, ThreatError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration could not be loaded or is inconsistent.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`VerifierConfig`](crate::VerifierConfig).
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment variable {var}")]
    Env {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
    },

    /// A value is out of range.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// A [`Verifier`](crate::Verifier) could not be assembled.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The audit store could not be opened.
    #[error("cannot open audit trail: {0}")]
    Audit(#[from] AuditError),
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Signature or public key material was unusable.
///
/// A well-formed signature that simply does not verify is not an error;
/// verifiers return `Ok(false)` for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Hex decoding failed.
    #[error("invalid hex in {what}: {reason}")]
    Hex {
        /// `"public key"` or `"signature"`.
        what: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// Key and signature lengths match no supported algorithm.
    #[error("unsupported key/signature lengths: key {key_len} bytes, signature {signature_len} bytes")]
    UnsupportedAlgorithm {
        /// Public key length in bytes.
        key_len: usize,
        /// Signature length in bytes.
        signature_len: usize,
    },

    /// The public key bytes do not decode to a curve point.
    #[error("invalid public key: {0}")]
    PublicKey(String),

    /// The signature bytes are structurally invalid.
    #[error("malformed signature: {0}")]
    Malformed(String),

    /// The signing payload could not be canonicalized.
    #[error("cannot build signing payload: {0}")]
    Payload(String),
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// A DID resolver or status provider failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} unavailable: {reason}")]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub service: &'static str,
    /// Failure detail.
    pub reason: String,
}

impl CollaboratorError {
    /// Failure of `service`.
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pipeline stage at which a verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Transport decoding and field typing.
    Parse,
    /// Semantic checks including the nonce.
    Validate,
    /// Admission control.
    RateLimit,
    /// Block list lookup.
    ThreatCheck,
    /// Holder DID resolution.
    DidResolution,
    /// Holder signature.
    Signature,
    /// Credential lifecycle status.
    CredentialStatus,
    /// Audit trail write.
    Audit,
    /// Batch scheduling.
    Batch,
}

impl Stage {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Validate => "validate",
            Self::RateLimit => "rate_limit",
            Self::ThreatCheck => "threat_check",
            Self::DidResolution => "did_resolution",
            Self::Signature => "signature",
            Self::CredentialStatus => "credential_status",
            Self::Audit => "audit",
            Self::Batch => "batch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a presentation was not verified.
#[derive(Error, Debug)]
pub enum VerificationError {
    /// The raw input is not a well-formed presentation.
    #[error(transparent)]
    Parse(#[from] QrParseError),

    /// The presentation failed a semantic check, expired, or reused a nonce.
    #[error(transparent)]
    Validation(#[from] QrValidationError),

    /// The caller is over its request budget.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// The caller is on the block list.
    #[error(transparent)]
    Blocked(#[from] ThreatError),

    /// The holder DID has no usable document.
    #[error("cannot resolve holder DID {did:?}: {reason}")]
    DidResolution {
        /// The holder DID.
        did: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The signature or key material could not be processed.
    #[error(transparent)]
    SignatureMalformed(#[from] SignatureError),

    /// No key in the holder's document verifies the signature.
    #[error("signature does not verify against any key of {did:?}")]
    SignatureInvalid {
        /// The holder DID.
        did: String,
    },

    /// Credential status could not be fetched.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The audit trail could not be written.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The batch exceeded its wall-clock budget.
    #[error("batch timed out after {timeout_ms} ms with {completed}/{total} verifications finished")]
    BatchTimeout {
        /// Configured budget.
        timeout_ms: u64,
        /// Verifications that had finished.
        completed: usize,
        /// Batch size.
        total: usize,
    },

    /// A verification task failed to run to completion.
    #[error("verification task failed: {0}")]
    Task(String),
}

impl VerificationError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Parse(_) => Stage::Parse,
            Self::Validation(_) => Stage::Validate,
            Self::RateLimited(_) => Stage::RateLimit,
            Self::Blocked(_) => Stage::ThreatCheck,
            Self::DidResolution { .. } => Stage::DidResolution,
            Self::SignatureMalformed(_) | Self::SignatureInvalid { .. } => Stage::Signature,
            Self::Collaborator(_) => Stage::CredentialStatus,
            Self::Audit(_) => Stage::Audit,
            Self::BatchTimeout { .. } | Self::Task(_) => Stage::Batch,
        }
    }

    /// True if the error is caused by the presented data rather than by
    /// infrastructure or by the caller's request pattern.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Parse(_)
                | Self::Validation(_)
                | Self::DidResolution { .. }
                | Self::SignatureMalformed(_)
                | Self::SignatureInvalid { .. }
        )
    }
}

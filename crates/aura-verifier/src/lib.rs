//! # aura-verifier: The Verification Gate
//!
//! Wires the stages from `aura-qr`, `aura-security` and `aura-audit` into a
//! single [`Verifier`]:
//!
//! ```text
//! raw QR string
//!   → QrParser → QrValidator (+ NonceManager)
//!   → CompositeRateLimiter → ThreatDetector block list
//!   → DidResolver → SignatureVerifier → CredentialStatusProvider
//!   → ThreatDetector tracking → AuditLogger
//! ```
//!
//! DID resolution and credential status are injected through the
//! [`DidResolver`] and [`CredentialStatusProvider`] traits; holder signatures
//! are checked by a [`SignatureVerifier`], by default
//! [`DefaultSignatureVerifier`] (Ed25519 and secp256k1).
//!
//! Configuration is a single [`VerifierConfig`], loadable from YAML with
//! `AURA_*` environment overrides.
//!
//! ## Crate Policy
//!
//! - Every component receives its state and its clock from the builder;
//!   two verifiers in one process share nothing.
//! - No `.unwrap()` outside tests.

pub mod batch;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod signature;

pub use batch::BatchItem;
pub use collaborators::{
    CredentialStatus, CredentialStatusProvider, DidDocument, DidResolver, StaticDidResolver, StaticStatusProvider,
    VerificationMethod,
};
pub use config::{BatchConfig, NonceBackend, VerifierConfig};
pub use error::{BuildError, CollaboratorError, ConfigError, SignatureError, Stage, VerificationError};
pub use pipeline::{
    CredentialCheck, VerificationContext, VerificationReport, Verifier, VerifierBuilder, ANONYMOUS_CALLER,
    UNVERIFIED_PREFIX,
};
pub use signature::{verify_presentation_signature, DefaultSignatureVerifier, SignatureAlgorithm, SignatureVerifier};

//! # External Collaborators
//!
//! DID resolution and credential status are I/O bound and live outside this
//! workspace (chain RPC, registries, caches). The pipeline consumes them
//! through [`DidResolver`] and [`CredentialStatusProvider`]. The static
//! implementations here serve tests and offline deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

// ---------------------------------------------------------------------------
// DID resolution
// ---------------------------------------------------------------------------

/// A public key listed in a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Key identifier, e.g. `did:aura:mainnet:abc#key-1`.
    pub id: String,
    /// Public key bytes, hex.
    pub public_key_hex: String,
}

/// The parts of a resolved DID document the verifier uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    /// The DID the document describes.
    pub id: String,
    /// Keys authorized to sign presentations.
    pub verification_methods: Vec<VerificationMethod>,
}

impl DidDocument {
    /// Document with a single key `#key-1`.
    pub fn with_key(did: impl Into<String>, public_key_hex: impl Into<String>) -> Self {
        let did = did.into();
        Self {
            verification_methods: vec![VerificationMethod {
                id: format!("{did}#key-1"),
                public_key_hex: public_key_hex.into(),
            }],
            id: did,
        }
    }
}

/// Resolves a holder DID to its document.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// `Ok(None)` if the DID is unknown or deactivated.
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if the resolver could not be reached.
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, CollaboratorError>;
}

/// Resolver over a fixed in-memory table.
#[derive(Debug, Default)]
pub struct StaticDidResolver {
    documents: RwLock<HashMap<String, DidDocument>>,
}

impl StaticDidResolver {
    /// Empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a document.
    pub fn insert(&self, document: DidDocument) {
        self.documents.write().insert(document.id.clone(), document);
    }

    /// Remove a document, simulating deactivation.
    pub fn remove(&self, did: &str) -> Option<DidDocument> {
        self.documents.write().remove(did)
    }
}

#[async_trait]
impl DidResolver for StaticDidResolver {
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, CollaboratorError> {
        Ok(self.documents.read().get(did).cloned())
    }
}

// ---------------------------------------------------------------------------
// Credential status
// ---------------------------------------------------------------------------

/// Lifecycle status of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Issued and in force.
    Active,
    /// Permanently withdrawn by the issuer.
    Revoked,
    /// Past its validity period.
    Expired,
    /// Temporarily withdrawn.
    Suspended,
    /// Issued but not yet in force.
    Pending,
}

impl CredentialStatus {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }

    /// Only active credentials count as verified.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks up the current status of a credential.
#[async_trait]
pub trait CredentialStatusProvider: Send + Sync {
    /// `Ok(None)` if the credential is unknown.
    ///
    /// # Errors
    ///
    /// [`CollaboratorError`] if the registry could not be reached.
    async fn status(&self, credential_id: &str) -> Result<Option<CredentialStatus>, CollaboratorError>;
}

/// Status provider over a fixed in-memory table.
#[derive(Debug, Default)]
pub struct StaticStatusProvider {
    statuses: RwLock<HashMap<String, CredentialStatus>>,
}

impl StaticStatusProvider {
    /// Empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of `credential_id`.
    pub fn set(&self, credential_id: impl Into<String>, status: CredentialStatus) {
        self.statuses.write().insert(credential_id.into(), status);
    }
}

#[async_trait]
impl CredentialStatusProvider for StaticStatusProvider {
    async fn status(&self, credential_id: &str) -> Result<Option<CredentialStatus>, CollaboratorError> {
        Ok(self.statuses.read().get(credential_id).copied())
    }
}

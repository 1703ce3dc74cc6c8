//! # Presentation Model and Wire Encoding
//!
//! A [`QrPresentation`] is the claim bundle a holder shows to a verifier.
//! On the wire it is a JSON object with short keys, base64-encoded and
//! optionally wrapped as `aura://verify?data=<base64>`:
//!
//! | key   | field             | JSON type                |
//! |-------|-------------------|--------------------------|
//! | `v`   | version           | string                   |
//! | `p`   | presentation ID   | string                   |
//! | `h`   | holder DID        | string                   |
//! | `vcs` | credential IDs    | array of strings         |
//! | `ctx` | disclosure context| object of string→boolean |
//! | `exp` | expiration        | integer Unix seconds     |
//! | `n`   | nonce             | non-negative integer     |
//! | `sig` | signature         | hex string               |
//!
//! The holder signs the canonical (JCS) JSON of the wire object with the
//! `sig` key removed; see [`QrPresentation::signing_payload`].

use std::collections::BTreeMap;

use aura_core::{CanonicalBytes, CanonicalizationError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Protocol version emitted by this crate.
pub const PROTOCOL_VERSION: &str = "1.0";

/// URL scheme of the transport envelope.
pub const DEFAULT_SCHEME: &str = "aura";

/// URL verb (authority part) of the transport envelope.
pub const DEFAULT_VERB: &str = "verify";

/// Selective-disclosure flags, e.g. `show_age_over_21 → true`.
///
/// Open schema: any key is allowed.
pub type DisclosureContext = BTreeMap<String, bool>;

/// A parsed QR presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPresentation {
    /// Protocol version.
    #[serde(rename = "v")]
    pub version: String,
    /// Presentation identifier.
    #[serde(rename = "p")]
    pub presentation_id: String,
    /// Holder DID.
    #[serde(rename = "h")]
    pub holder_did: String,
    /// Referenced credential identifiers.
    #[serde(rename = "vcs")]
    pub credential_ids: Vec<String>,
    /// Disclosure flags.
    #[serde(rename = "ctx")]
    pub context: DisclosureContext,
    /// Expiration as Unix seconds.
    #[serde(rename = "exp")]
    pub expiration: i64,
    /// Anti-replay nonce.
    #[serde(rename = "n")]
    pub nonce: u64,
    /// Holder signature, hex.
    #[serde(rename = "sig")]
    pub signature: String,
}

impl QrPresentation {
    /// The wire JSON object.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "v": self.version,
            "p": self.presentation_id,
            "h": self.holder_did,
            "vcs": self.credential_ids,
            "ctx": self.context,
            "exp": self.expiration,
            "n": self.nonce,
            "sig": self.signature,
        })
    }

    /// Standard base64 (with padding) of the compact wire JSON.
    pub fn encode_base64(&self) -> String {
        STANDARD.encode(self.to_wire().to_string())
    }

    /// The full transport string, `<scheme>://<verb>?data=<base64>`.
    pub fn to_qr_string(&self, scheme: &str, verb: &str) -> String {
        format!("{scheme}://{verb}?data={}", self.encode_base64())
    }

    /// Canonical bytes the holder signs: the wire object without `sig`.
    ///
    /// # Errors
    ///
    /// Propagates canonicalization failure (not expected for this shape).
    pub fn signing_payload(&self) -> Result<CanonicalBytes, CanonicalizationError> {
        let mut wire = self.to_wire();
        if let Some(obj) = wire.as_object_mut() {
            obj.remove("sig");
        }
        CanonicalBytes::new(&wire)
    }

    /// True if at least one disclosure flag is set.
    pub fn discloses_anything(&self) -> bool {
        self.context.values().any(|v| *v)
    }
}

/// Field of a presentation, as named in validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationField {
    /// `v`
    Version,
    /// `p`
    PresentationId,
    /// `h`
    HolderDid,
    /// `vcs`
    CredentialIds,
    /// `ctx`
    Context,
    /// `exp`
    Expiration,
    /// `n`
    Nonce,
    /// `sig`
    Signature,
}

impl PresentationField {
    /// Every field, in wire order.
    pub const ALL: [PresentationField; 8] = [
        Self::Version,
        Self::PresentationId,
        Self::HolderDid,
        Self::CredentialIds,
        Self::Context,
        Self::Expiration,
        Self::Nonce,
        Self::Signature,
    ];

    /// The short wire key.
    pub fn wire_key(self) -> &'static str {
        match self {
            Self::Version => "v",
            Self::PresentationId => "p",
            Self::HolderDid => "h",
            Self::CredentialIds => "vcs",
            Self::Context => "ctx",
            Self::Expiration => "exp",
            Self::Nonce => "n",
            Self::Signature => "sig",
        }
    }

    /// The descriptive name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::PresentationId => "presentation_id",
            Self::HolderDid => "holder_did",
            Self::CredentialIds => "credential_ids",
            Self::Context => "context",
            Self::Expiration => "expiration",
            Self::Nonce => "nonce",
            Self::Signature => "signature",
        }
    }
}

impl std::fmt::Display for PresentationField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn sample(now_secs: i64) -> QrPresentation {
        let mut context = DisclosureContext::new();
        context.insert("show_age_over_21".to_string(), true);
        QrPresentation {
            version: PROTOCOL_VERSION.to_string(),
            presentation_id: "pres-1".to_string(),
            holder_did: "did:aura:mainnet:abc123".to_string(),
            credential_ids: vec!["vc-1".to_string()],
            context,
            expiration: now_secs + 3_600,
            nonce: 42,
            signature: "a".repeat(128),
        }
    }
}

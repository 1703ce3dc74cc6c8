//! # Identity Newtypes
//!
//! Decentralized identifier newtypes. Both validate format at construction
//! and during deserialization, so an invalid identifier cannot enter the
//! pipeline through a config file or a stored audit record.
//!
//! - [`Did`]: any W3C DID (`did:<method>:<method-specific-id>`).
//! - [`AuraDid`]: the holder shape accepted by Aura verifiers,
//!   `did:aura:<network>:<identifier>`.

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// W3C Decentralized Identifier.
///
/// # Validation
///
/// - Must start with `did:`
/// - Method name must be non-empty lowercase alphanumeric
/// - Method-specific identifier must be non-empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Did(String);

impl_validating_deserialize!(Did);

impl Did {
    /// Create a DID from a string, validating format.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidDid`] if the string does not match
    /// `did:method:identifier`.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = value.into();
        match split_did(&s) {
            Some(_) => Ok(Self(s)),
            None => Err(IdentifierError::InvalidDid(s)),
        }
    }

    /// Access the DID string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method (the part between the first and second colons).
    pub fn method(&self) -> &str {
        split_did(&self.0).map(|(m, _)| m).unwrap_or_default()
    }

    /// Everything after `did:<method>:`.
    pub fn method_specific_id(&self) -> &str {
        split_did(&self.0).map(|(_, id)| id).unwrap_or_default()
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_did(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix("did:")?;
    let (method, id) = rest.split_once(':')?;
    let method_ok = !method.is_empty()
        && method
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if method_ok && !id.is_empty() {
        Some((method, id))
    } else {
        None
    }
}

/// Holder identifier of the shape `did:aura:<network>:<identifier>`.
///
/// Exactly four colon-delimited segments; the network is non-empty and the
/// identifier is restricted to `[a-zA-Z0-9._-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AuraDid(String);

impl_validating_deserialize!(AuraDid);

impl AuraDid {
    /// The DID method all Aura holders use.
    pub const METHOD: &'static str = "aura";

    /// Create an Aura DID, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidAuraDid`] naming the violated part.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = value.into();
        match check_aura_shape(&s) {
            Ok(()) => Ok(Self(s)),
            Err(reason) => Err(IdentifierError::InvalidAuraDid {
                did: s,
                reason: reason.to_string(),
            }),
        }
    }

    /// Access the DID string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The network segment (e.g. `mainnet`, `testnet`).
    pub fn network(&self) -> &str {
        self.0.split(':').nth(2).unwrap_or_default()
    }

    /// The identifier segment.
    pub fn identifier(&self) -> &str {
        self.0.split(':').nth(3).unwrap_or_default()
    }
}

impl std::fmt::Display for AuraDid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<AuraDid> for Did {
    fn from(did: AuraDid) -> Self {
        Did(did.0)
    }
}

fn check_aura_shape(s: &str) -> Result<(), &'static str> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err("expected exactly four colon-delimited segments");
    }
    if parts[0] != "did" {
        return Err("must start with \"did:\"");
    }
    if parts[1] != AuraDid::METHOD {
        return Err("method must be \"aura\"");
    }
    if parts[2].is_empty() {
        return Err("network must be non-empty");
    }
    let id = parts[3];
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err("identifier must match [a-zA-Z0-9._-]+");
    }
    Ok(())
}

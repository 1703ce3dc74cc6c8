//! # Holder Signature Verification
//!
//! Presentations are signed over [`QrPresentation::signing_payload`], the
//! canonical JSON of the wire object without `sig`. The algorithm is
//! detected from key and signature lengths:
//!
//! | Algorithm | Public key | Signature |
//! |-----------|------------|-----------|
//! | Ed25519 | 32 bytes | 64 bytes |
//! | secp256k1 ECDSA over SHA-256 | 33 (compressed) or 65 (uncompressed) bytes SEC1 | 64 bytes `r ∥ s` |
//!
//! ## Security Invariant
//!
//! Verification input is `&CanonicalBytes`, never raw bytes, so a signature
//! can only ever be checked against the canonical payload. High-S ECDSA
//! signatures are rejected.

use aura_core::CanonicalBytes;
use aura_qr::QrPresentation;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SignatureError;

/// Signature scheme accepted for holder signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// Ed25519 (RFC 8032), strict verification.
    Ed25519,
    /// ECDSA on secp256k1 over SHA-256.
    Secp256k1,
}

impl SignatureAlgorithm {
    /// Algorithm implied by key and signature lengths.
    ///
    /// # Errors
    ///
    /// [`SignatureError::UnsupportedAlgorithm`] for any other combination.
    pub fn detect(key_len: usize, signature_len: usize) -> Result<Self, SignatureError> {
        match (key_len, signature_len) {
            (32, 64) => Ok(Self::Ed25519),
            (33 | 65, 64) => Ok(Self::Secp256k1),
            _ => Err(SignatureError::UnsupportedAlgorithm {
                key_len,
                signature_len,
            }),
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Secp256k1 => "secp256k1",
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks a signature over canonical bytes.
pub trait SignatureVerifier: Send + Sync + std::fmt::Debug {
    /// `Ok(true)` if `signature` is valid for `message` under `public_key`,
    /// `Ok(false)` if it is well-formed but does not verify.
    ///
    /// # Errors
    ///
    /// [`SignatureError`] if the key or signature cannot be decoded or the
    /// algorithm cannot be determined.
    fn verify(&self, message: &CanonicalBytes, public_key: &[u8], signature: &[u8]) -> Result<bool, SignatureError>;
}

/// Length-detecting Ed25519 / secp256k1 verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSignatureVerifier;

impl DefaultSignatureVerifier {
    fn verify_ed25519(message: &[u8], public_key: &[u8], signature: &[u8]) -> Result<bool, SignatureError> {
        let key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| SignatureError::PublicKey(format!("expected 32 bytes, got {}", public_key.len())))?;
        let sig: [u8; 64] = signature
            .try_into()
            .map_err(|_| SignatureError::Malformed(format!("expected 64 bytes, got {}", signature.len())))?;
        let vk = ed25519_dalek::VerifyingKey::from_bytes(&key).map_err(|e| SignatureError::PublicKey(e.to_string()))?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig);
        Ok(vk.verify_strict(message, &sig).is_ok())
    }

    fn verify_secp256k1(message: &[u8], public_key: &[u8], signature: &[u8]) -> Result<bool, SignatureError> {
        let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| SignatureError::PublicKey(e.to_string()))?;
        let sig = k256::ecdsa::Signature::from_slice(signature).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        // Malleable form: (r, n - s) verifies the same message.
        if sig.normalize_s().is_some() {
            return Ok(false);
        }
        let digest = Sha256::digest(message);
        Ok(vk.verify_prehash(&digest, &sig).is_ok())
    }
}

impl SignatureVerifier for DefaultSignatureVerifier {
    fn verify(&self, message: &CanonicalBytes, public_key: &[u8], signature: &[u8]) -> Result<bool, SignatureError> {
        match SignatureAlgorithm::detect(public_key.len(), signature.len())? {
            SignatureAlgorithm::Ed25519 => Self::verify_ed25519(message.as_bytes(), public_key, signature),
            SignatureAlgorithm::Secp256k1 => Self::verify_secp256k1(message.as_bytes(), public_key, signature),
        }
    }
}

/// Verify a presentation's `sig` against one hex-encoded public key.
///
/// # Errors
///
/// [`SignatureError`] if the hex, the key or the signature is unusable.
pub fn verify_presentation_signature(
    verifier: &dyn SignatureVerifier,
    presentation: &QrPresentation,
    public_key_hex: &str,
) -> Result<bool, SignatureError> {
    let payload = presentation
        .signing_payload()
        .map_err(|e| SignatureError::Payload(e.to_string()))?;
    let key = hex_to_bytes(public_key_hex).map_err(|reason| SignatureError::Hex {
        what: "public key",
        reason,
    })?;
    let sig = hex_to_bytes(&presentation.signature).map_err(|reason| SignatureError::Hex {
        what: "signature",
        reason,
    })?;
    verifier.verify(&payload, &key, &sig)
}

pub(crate) fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, String> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if !hex.is_ascii() {
        return Err("hex string must be ASCII".to_string());
    }
    if hex.len() % 2 != 0 {
        return Err("hex string must have even length".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("invalid hex at position {i}: {e}")))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;
    use aura_qr::{DisclosureContext, PROTOCOL_VERSION};

    fn presentation() -> QrPresentation {
        QrPresentation {
            version: PROTOCOL_VERSION.to_string(),
            presentation_id: "pres-1".to_string(),
            holder_did: "did:aura:mainnet:abc123".to_string(),
            credential_ids: vec!["vc-1".to_string()],
            context: DisclosureContext::new(),
            expiration: 2_000_000_000,
            nonce: 7,
            signature: String::new(),
        }
    }

    #[test]
    fn detects_algorithm_by_length() {
        assert_eq!(SignatureAlgorithm::detect(32, 64).unwrap(), SignatureAlgorithm::Ed25519);
        assert_eq!(SignatureAlgorithm::detect(33, 64).unwrap(), SignatureAlgorithm::Secp256k1);
        assert_eq!(SignatureAlgorithm::detect(65, 64).unwrap(), SignatureAlgorithm::Secp256k1);
        assert!(matches!(
            SignatureAlgorithm::detect(32, 65),
            Err(SignatureError::UnsupportedAlgorithm { key_len: 32, signature_len: 65 })
        ));
    }

    #[test]
    fn ed25519_signature_verifies() {
        let mut p = presentation();
        let pk = sign_ed25519(&mut p, &ed25519_key(1));
        assert!(verify_presentation_signature(&DefaultSignatureVerifier, &p, &pk).unwrap());
    }

    #[test]
    fn ed25519_rejects_tampered_payload() {
        let mut p = presentation();
        let pk = sign_ed25519(&mut p, &ed25519_key(1));
        p.nonce += 1;
        assert!(!verify_presentation_signature(&DefaultSignatureVerifier, &p, &pk).unwrap());
    }

    #[test]
    fn ed25519_rejects_other_key() {
        let mut p = presentation();
        sign_ed25519(&mut p, &ed25519_key(1));
        let other = to_hex(ed25519_key(2).verifying_key().as_bytes());
        assert!(!verify_presentation_signature(&DefaultSignatureVerifier, &p, &other).unwrap());
    }

    #[test]
    fn secp256k1_signature_verifies_compressed_and_uncompressed() {
        let key = secp256k1_key(3);
        let mut p = presentation();
        let compressed = sign_secp256k1(&mut p, &key);
        assert_eq!(compressed.len(), 66);
        assert!(verify_presentation_signature(&DefaultSignatureVerifier, &p, &compressed).unwrap());

        let uncompressed = to_hex(key.verifying_key().to_encoded_point(false).as_bytes());
        assert_eq!(uncompressed.len(), 130);
        assert!(verify_presentation_signature(&DefaultSignatureVerifier, &p, &uncompressed).unwrap());

        p.presentation_id.push('x');
        assert!(!verify_presentation_signature(&DefaultSignatureVerifier, &p, &compressed).unwrap());
    }

    #[test]
    fn secp256k1_rejects_high_s_form() {
        let key = secp256k1_key(3);
        let mut p = presentation();
        let pk = sign_secp256k1(&mut p, &key);

        let low = k256::ecdsa::Signature::from_slice(&hex_to_bytes(&p.signature).unwrap()).unwrap();
        assert!(low.normalize_s().is_none(), "signer emits low-S");
        let (r, s) = low.split_scalars();
        let high = k256::ecdsa::Signature::from_scalars(*r, -*s).unwrap();
        assert!(high.normalize_s().is_some());

        p.signature = to_hex(&high.to_bytes());
        assert!(!verify_presentation_signature(&DefaultSignatureVerifier, &p, &pk).unwrap());
    }

    #[test]
    fn malformed_inputs_are_errors() {
        let mut p = presentation();
        let pk = sign_ed25519(&mut p, &ed25519_key(1));

        let err = verify_presentation_signature(&DefaultSignatureVerifier, &p, "zz").unwrap_err();
        assert!(matches!(err, SignatureError::Hex { what: "public key", .. }));

        p.signature = "abc".to_string();
        let err = verify_presentation_signature(&DefaultSignatureVerifier, &p, &pk).unwrap_err();
        assert!(matches!(err, SignatureError::Hex { what: "signature", .. }));

        p.signature = "ab".repeat(64);
        let bad_point = format!("05{}", "00".repeat(32));
        let err = verify_presentation_signature(&DefaultSignatureVerifier, &p, &bad_point).unwrap_err();
        assert!(matches!(err, SignatureError::PublicKey(_)));
    }

    #[test]
    fn hex_decoding() {
        assert_eq!(hex_to_bytes("0x00ff").unwrap(), vec![0, 255]);
        assert!(hex_to_bytes("0").is_err());
        assert!(hex_to_bytes("éé").is_err());
    }
}

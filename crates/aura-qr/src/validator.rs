//! # Presentation Validator
//!
//! Semantic checks on a parsed [`QrPresentation`]. The validator never
//! mutates a presentation; it classifies it into a [`ValidationResult`] with
//! blocking errors and non-blocking warnings.
//!
//! ## Entry points
//!
//! - [`QrValidator::validate`]: synchronous, returns a result.
//! - [`QrValidator::validate_async`]: runs the synchronous checks, then, only
//!   if they all passed, asks a [`NonceChecker`] about the nonce.
//! - `*_strict` variants return the first failure as a [`QrValidationError`].
//!
//! ## Nonce oracle
//!
//! When the nonce checker refuses a nonce, or fails outright, the caller
//! sees the same generic nonce error either way. The reason is logged at
//! debug level only.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use aura_core::sanitize::{detect_injection, is_hex};
use aura_core::{AuraDid, Clock, SystemClock};
use serde::{Deserialize, Serialize};

use crate::error::{ExpiredError, QrValidationError};
use crate::presentation::{PresentationField, QrPresentation, PROTOCOL_VERSION};

const SECS_PER_YEAR: i64 = 365 * 24 * 60 * 60;
const MAX_FUTURE_SECS: i64 = 10 * SECS_PER_YEAR;

/// Signature length bounds in hex characters (32 to 128 bytes).
pub const MIN_SIGNATURE_HEX_LEN: usize = 64;
/// See [`MIN_SIGNATURE_HEX_LEN`].
pub const MAX_SIGNATURE_HEX_LEN: usize = 256;

/// Message used for every nonce-check failure surfaced to callers.
pub const NONCE_REJECTED_MESSAGE: &str = "Nonce validation failed";

/// Validator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Check the version against `supported_versions`.
    pub validate_version: bool,
    /// Accepted protocol versions.
    pub supported_versions: Vec<String>,
    /// Check the holder against the `did:aura:<network>:<id>` shape.
    pub validate_holder_did: bool,
    /// Check expiration.
    pub validate_expiration: bool,
    /// Grace period after expiration, in seconds.
    pub expiration_tolerance_secs: i64,
    /// Check signature shape.
    pub validate_signature: bool,
    /// Warn when the context discloses nothing.
    pub validate_context: bool,
    /// Maximum presentation ID length in characters.
    pub max_presentation_id_len: usize,
    /// Credential ID count above which a warning is raised.
    pub credential_ids_warning_threshold: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            validate_version: true,
            supported_versions: vec![PROTOCOL_VERSION.to_string()],
            validate_holder_did: true,
            validate_expiration: true,
            expiration_tolerance_secs: 0,
            validate_signature: true,
            validate_context: true,
            max_presentation_id_len: 256,
            credential_ids_warning_threshold: 10,
        }
    }
}

/// Whether an issue blocks acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Blocks acceptance.
    Error,
    /// Informational.
    Warning,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field concerned.
    pub field: PresentationField,
    /// Description.
    pub message: String,
    /// Blocking or not.
    pub severity: IssueSeverity,
}

/// Outcome of a validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True iff `errors` is empty.
    pub valid: bool,
    /// Blocking issues, in check order.
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking issues, in check order.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// First blocking issue, if any.
    pub fn first_error(&self) -> Option<&ValidationIssue> {
        self.errors.first()
    }
}

#[derive(Default)]
struct Issues {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Issues {
    fn error(&mut self, field: PresentationField, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field,
            message: message.into(),
            severity: IssueSeverity::Error,
        });
    }

    fn warn(&mut self, field: PresentationField, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field,
            message: message.into(),
            severity: IssueSeverity::Warning,
        });
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Error type returned by nonce checkers.
pub type NonceCheckError = Box<dyn std::error::Error + Send + Sync>;

/// Collaborator consulted by [`QrValidator::validate_async`].
#[async_trait]
pub trait NonceChecker: Send + Sync {
    /// Return `Ok(true)` to accept the presentation's nonce.
    async fn check_nonce(&self, presentation: &QrPresentation) -> Result<bool, NonceCheckError>;
}

/// Validate a presentation against `options` at time `now_secs`.
///
/// Pure: same inputs, same result.
pub fn validate_presentation(
    p: &QrPresentation,
    options: &ValidationOptions,
    now_secs: i64,
) -> ValidationResult {
    let mut issues = Issues::default();
    check_version(p, options, &mut issues);
    check_presentation_id(p, options, &mut issues);
    check_holder(p, options, &mut issues);
    check_credential_ids(p, options, &mut issues);
    if options.validate_context && !p.discloses_anything() {
        issues.warn(PresentationField::Context, "Context does not disclose any field");
    }
    if options.validate_expiration {
        check_expiration(p, options, now_secs, &mut issues);
    }
    if options.validate_signature {
        check_signature(p, &mut issues);
    }
    issues.finish()
}

fn check_version(p: &QrPresentation, options: &ValidationOptions, issues: &mut Issues) {
    if !options.validate_version {
        return;
    }
    if p.version.trim().is_empty() {
        issues.error(PresentationField::Version, "Version must not be empty");
    } else if !options.supported_versions.iter().any(|v| v == &p.version) {
        issues.error(
            PresentationField::Version,
            format!(
                "Unsupported version \"{}\"; supported versions: {}",
                p.version,
                options.supported_versions.join(", ")
            ),
        );
    }
}

fn check_presentation_id(p: &QrPresentation, options: &ValidationOptions, issues: &mut Issues) {
    let id = p.presentation_id.trim();
    if id.is_empty() {
        issues.error(PresentationField::PresentationId, "Presentation ID must not be empty");
        return;
    }
    let len = p.presentation_id.chars().count();
    if len > options.max_presentation_id_len {
        issues.error(
            PresentationField::PresentationId,
            format!(
                "Presentation ID is {len} characters (max {})",
                options.max_presentation_id_len
            ),
        );
    }
    if let Some(kind) = detect_injection(id) {
        issues.warn(
            PresentationField::PresentationId,
            format!("Presentation ID contains a suspicious {kind} pattern"),
        );
    }
}

fn check_holder(p: &QrPresentation, options: &ValidationOptions, issues: &mut Issues) {
    if p.holder_did.trim().is_empty() {
        issues.error(PresentationField::HolderDid, "Holder DID must not be empty");
        return;
    }
    if options.validate_holder_did {
        if let Err(e) = AuraDid::new(p.holder_did.as_str()) {
            issues.error(PresentationField::HolderDid, e.to_string());
        }
    }
}

fn check_credential_ids(p: &QrPresentation, options: &ValidationOptions, issues: &mut Issues) {
    if p.credential_ids.is_empty() {
        issues.error(
            PresentationField::CredentialIds,
            "At least one credential ID is required",
        );
        return;
    }
    for (i, id) in p.credential_ids.iter().enumerate() {
        if id.trim().is_empty() {
            issues.error(
                PresentationField::CredentialIds,
                format!("Credential ID at index {i} is empty"),
            );
        }
    }
    let unique: HashSet<&str> = p.credential_ids.iter().map(String::as_str).collect();
    if unique.len() != p.credential_ids.len() {
        issues.warn(PresentationField::CredentialIds, "Duplicate credential IDs");
    }
    if p.credential_ids.len() > options.credential_ids_warning_threshold {
        issues.warn(
            PresentationField::CredentialIds,
            format!(
                "{} credential IDs exceeds the recommended maximum of {}",
                p.credential_ids.len(),
                options.credential_ids_warning_threshold
            ),
        );
    }
}

fn check_expiration(p: &QrPresentation, options: &ValidationOptions, now: i64, issues: &mut Issues) {
    if p.expiration <= 0 {
        issues.error(
            PresentationField::Expiration,
            "Expiration must be a positive Unix timestamp",
        );
    } else if is_expired(p.expiration, now, options.expiration_tolerance_secs) {
        issues.error(
            PresentationField::Expiration,
            format!("Presentation expired at {} (now {now})", p.expiration),
        );
    } else if p.expiration > now.saturating_add(MAX_FUTURE_SECS) {
        issues.error(
            PresentationField::Expiration,
            "Expiration is more than 10 years in the future",
        );
    }
}

fn is_expired(expiration: i64, now: i64, tolerance_secs: i64) -> bool {
    expiration < now.saturating_sub(tolerance_secs)
}

fn check_signature(p: &QrPresentation, issues: &mut Issues) {
    let sig = &p.signature;
    if sig.is_empty() {
        issues.error(PresentationField::Signature, "Signature must not be empty");
    } else if !is_hex(sig) {
        issues.error(PresentationField::Signature, "Signature must be hexadecimal");
    } else if sig.len() % 2 != 0 {
        issues.error(PresentationField::Signature, "Signature must have even length");
    } else if !(MIN_SIGNATURE_HEX_LEN..=MAX_SIGNATURE_HEX_LEN).contains(&sig.len()) {
        issues.error(
            PresentationField::Signature,
            format!(
                "Signature is {} bytes (expected 32 to 128)",
                sig.len() / 2
            ),
        );
    }
}

/// Validator bound to options and a clock.
#[derive(Debug, Clone)]
pub struct QrValidator {
    options: ValidationOptions,
    clock: Arc<dyn Clock>,
}

impl Default for QrValidator {
    fn default() -> Self {
        Self::new(ValidationOptions::default())
    }
}

impl QrValidator {
    /// Validator using the system clock.
    pub fn new(options: ValidationOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Validator using an injected clock.
    pub fn with_clock(options: ValidationOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    /// The active options.
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Synchronous validation.
    pub fn validate(&self, p: &QrPresentation) -> ValidationResult {
        validate_presentation(p, &self.options, self.clock.now_secs())
    }

    /// Synchronous validation plus one nonce check.
    ///
    /// The checker runs only if the synchronous checks produced no errors.
    pub async fn validate_async(
        &self,
        p: &QrPresentation,
        checker: Option<&dyn NonceChecker>,
    ) -> ValidationResult {
        let mut result = self.validate(p);
        let Some(checker) = checker else {
            return result;
        };
        if !result.valid {
            return result;
        }
        let accepted = match checker.check_nonce(p).await {
            Ok(accepted) => {
                if !accepted {
                    tracing::debug!(presentation_id = %p.presentation_id, "nonce refused");
                }
                accepted
            }
            Err(e) => {
                tracing::debug!(presentation_id = %p.presentation_id, error = %e, "nonce check failed");
                false
            }
        };
        if !accepted {
            result.errors.push(ValidationIssue {
                field: PresentationField::Nonce,
                message: NONCE_REJECTED_MESSAGE.to_string(),
                severity: IssueSeverity::Error,
            });
            result.valid = false;
        }
        result
    }

    /// Like [`validate`](Self::validate) but returns the first error.
    ///
    /// # Errors
    ///
    /// [`QrValidationError::Expired`] if the presentation is past its
    /// expiration (plus tolerance), otherwise [`QrValidationError::Field`].
    pub fn validate_strict(&self, p: &QrPresentation) -> Result<ValidationResult, QrValidationError> {
        let now = self.clock.now_secs();
        let result = validate_presentation(p, &self.options, now);
        self.raise_first(p, result, now)
    }

    /// Like [`validate_async`](Self::validate_async) but returns the first error.
    ///
    /// # Errors
    ///
    /// As [`validate_strict`](Self::validate_strict), plus
    /// [`QrValidationError::Nonce`] when the nonce checker refuses.
    pub async fn validate_async_strict(
        &self,
        p: &QrPresentation,
        checker: Option<&dyn NonceChecker>,
    ) -> Result<ValidationResult, QrValidationError> {
        let now = self.clock.now_secs();
        let result = self.validate_async(p, checker).await;
        self.raise_first(p, result, now)
    }

    fn raise_first(
        &self,
        p: &QrPresentation,
        result: ValidationResult,
        now: i64,
    ) -> Result<ValidationResult, QrValidationError> {
        let Some(first) = result.first_error() else {
            return Ok(result);
        };
        Err(match first.field {
            PresentationField::Expiration
                if p.expiration > 0
                    && is_expired(p.expiration, now, self.options.expiration_tolerance_secs) =>
            {
                QrValidationError::Expired(ExpiredError {
                    expires_at: p.expiration,
                    now,
                })
            }
            PresentationField::Nonce => QrValidationError::Nonce { nonce: p.nonce },
            field => QrValidationError::Field {
                field,
                message: first.message.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::fixtures::sample;
    use aura_core::ManualClock;

    const NOW: i64 = 1_768_478_400;

    fn validator(options: ValidationOptions) -> QrValidator {
        QrValidator::with_clock(options, Arc::new(ManualClock::new(NOW * 1000)))
    }

    fn default_validator() -> QrValidator {
        validator(ValidationOptions::default())
    }

    struct FixedChecker(Result<bool, &'static str>);

    #[async_trait]
    impl NonceChecker for FixedChecker {
        async fn check_nonce(&self, _p: &QrPresentation) -> Result<bool, NonceCheckError> {
            self.0.map_err(|e| e.into())
        }
    }

    struct PanickyChecker;

    #[async_trait]
    impl NonceChecker for PanickyChecker {
        async fn check_nonce(&self, _p: &QrPresentation) -> Result<bool, NonceCheckError> {
            panic!("nonce checker must not run when sync checks fail");
        }
    }

    #[test]
    fn valid_sample_has_no_issues() {
        let result = default_validator().validate(&sample(NOW));
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn unsupported_version_names_both() {
        let mut p = sample(NOW);
        p.version = "2.0".into();
        let result = default_validator().validate(&p);
        let err = result.first_error().unwrap();
        assert_eq!(err.field, PresentationField::Version);
        assert!(err.message.contains("2.0"));
        assert!(err.message.contains("1.0"));
    }

    #[test]
    fn presentation_id_bounds() {
        let mut p = sample(NOW);
        p.presentation_id = "  ".into();
        assert!(!default_validator().validate(&p).valid);
        p.presentation_id = "x".repeat(256);
        assert!(default_validator().validate(&p).valid);
        p.presentation_id = "x".repeat(257);
        assert!(!default_validator().validate(&p).valid);
    }

    #[test]
    fn holder_shape_is_optional() {
        let mut p = sample(NOW);
        p.holder_did = "did:web:example.com".into();
        let result = default_validator().validate(&p);
        assert_eq!(result.first_error().unwrap().field, PresentationField::HolderDid);

        let lax = validator(ValidationOptions {
            validate_holder_did: false,
            ..Default::default()
        });
        assert!(lax.validate(&p).valid);
    }

    #[test]
    fn credential_id_rules() {
        let mut p = sample(NOW);
        p.credential_ids.clear();
        assert!(!default_validator().validate(&p).valid);

        p.credential_ids = vec!["vc-1".into(), "".into()];
        let result = default_validator().validate(&p);
        assert!(result.errors[0].message.contains("index 1"));

        p.credential_ids = vec!["vc-1".into(), "vc-1".into()];
        let result = default_validator().validate(&p);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);

        p.credential_ids = (0..11).map(|i| format!("vc-{i}")).collect();
        let result = default_validator().validate(&p);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].severity, IssueSeverity::Warning);
    }

    #[test]
    fn empty_disclosure_warns() {
        let mut p = sample(NOW);
        p.context.clear();
        let result = default_validator().validate(&p);
        assert!(result.valid);
        assert_eq!(result.warnings[0].field, PresentationField::Context);

        let lax = validator(ValidationOptions {
            validate_context: false,
            ..Default::default()
        });
        assert!(lax.validate(&p).warnings.is_empty());
    }

    #[test]
    fn injection_in_presentation_id_warns() {
        let mut p = sample(NOW);
        p.presentation_id = "<script>x</script>".into();
        let result = default_validator().validate(&p);
        assert!(result.valid);
        assert_eq!(result.warnings[0].field, PresentationField::PresentationId);
    }

    #[test]
    fn expiration_rules() {
        let mut p = sample(NOW);
        p.expiration = NOW - 1;
        assert!(!default_validator().validate(&p).valid);

        let tolerant = validator(ValidationOptions {
            expiration_tolerance_secs: 60,
            ..Default::default()
        });
        assert!(tolerant.validate(&p).valid);

        p.expiration = NOW + 11 * SECS_PER_YEAR;
        assert!(!default_validator().validate(&p).valid);

        p.expiration = 0;
        assert!(!default_validator().validate(&p).valid);

        let skip = validator(ValidationOptions {
            validate_expiration: false,
            ..Default::default()
        });
        assert!(skip.validate(&p).valid);
    }

    #[test]
    fn signature_rules() {
        let cases = [
            (String::new(), false),
            ("zz".repeat(40), false),
            ("a".repeat(63), false),
            ("a".repeat(62), false),
            ("a".repeat(64), true),
            ("AbCd".repeat(64), true),
            ("a".repeat(258), false),
        ];
        for (sig, ok) in cases {
            let mut p = sample(NOW);
            p.signature = sig.clone();
            assert_eq!(default_validator().validate(&p).valid, ok, "{sig}");
        }
    }

    #[test]
    fn validation_does_not_mutate() {
        let p = sample(NOW);
        let before = p.clone();
        let _ = default_validator().validate(&p);
        assert_eq!(p, before);
    }

    #[test]
    fn strict_expired_carries_times() {
        let mut p = sample(NOW);
        p.expiration = NOW - 3_600;
        let err = default_validator().validate_strict(&p).unwrap_err();
        match err {
            QrValidationError::Expired(e) => {
                assert_eq!(e.expires_at, NOW - 3_600);
                assert_eq!(e.now, NOW);
                assert!(e.is_within_tolerance(7_200));
                assert!(!e.is_within_tolerance(60));
            }
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn strict_far_future_is_field_error() {
        let mut p = sample(NOW);
        p.expiration = NOW + 11 * SECS_PER_YEAR;
        let err = default_validator().validate_strict(&p).unwrap_err();
        assert!(matches!(
            err,
            QrValidationError::Field {
                field: PresentationField::Expiration,
                ..
            }
        ));
    }

    #[test]
    fn strict_field_error_names_field() {
        let mut p = sample(NOW);
        p.signature = "nothex".into();
        let err = default_validator().validate_strict(&p).unwrap_err();
        assert_eq!(err.field(), PresentationField::Signature);
    }

    #[test]
    fn strict_ok_returns_result() {
        let result = default_validator().validate_strict(&sample(NOW)).unwrap();
        assert!(result.valid);
    }

    #[tokio::test]
    async fn async_without_checker_equals_sync() {
        let v = default_validator();
        let p = sample(NOW);
        assert_eq!(v.validate_async(&p, None).await, v.validate(&p));
    }

    #[tokio::test]
    async fn async_checker_accepts() {
        let v = default_validator();
        let result = v.validate_async(&sample(NOW), Some(&FixedChecker(Ok(true)))).await;
        assert!(result.valid);
    }

    #[tokio::test]
    async fn refusal_and_failure_look_identical() {
        let v = default_validator();
        let p = sample(NOW);
        let refused = v.validate_async(&p, Some(&FixedChecker(Ok(false)))).await;
        let failed = v
            .validate_async(&p, Some(&FixedChecker(Err("storage unavailable"))))
            .await;
        assert!(!refused.valid);
        assert_eq!(refused, failed);
        assert_eq!(refused.errors[0].message, NONCE_REJECTED_MESSAGE);
        assert!(!failed.errors[0].message.contains("storage"));
    }

    #[tokio::test]
    async fn checker_skipped_when_sync_checks_fail() {
        let v = default_validator();
        let mut p = sample(NOW);
        p.version = "0.1".into();
        let result = v.validate_async(&p, Some(&PanickyChecker)).await;
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn async_strict_raises_nonce_error() {
        let v = default_validator();
        let err = v
            .validate_async_strict(&sample(NOW), Some(&FixedChecker(Ok(false))))
            .await
            .unwrap_err();
        assert_eq!(err, QrValidationError::Nonce { nonce: 42 });
    }
}

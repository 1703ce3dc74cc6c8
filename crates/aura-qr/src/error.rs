//! Parse and validation errors.
//!
//! Parsing failures carry a [`ParseErrorKind`] so callers can branch on the
//! class of malformation; the message names the offending field where one
//! exists. Validation failures raised by the strict validator entry points
//! are split three ways so a caller can tell "ask the holder to refresh the
//! code" ([`QrValidationError::Expired`]) from "reject as malformed".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::presentation::PresentationField;

/// Class of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// Input was the empty string.
    EmptyInput,
    /// Input consisted only of whitespace.
    WhitespaceOnly,
    /// Input exceeded the configured length bound or contained a NUL byte.
    InvalidInput,
    /// URL-shaped input that does not parse, or uses the wrong scheme.
    InvalidUrl,
    /// URL-shaped input whose verb is not the expected one.
    InvalidVerb,
    /// URL-shaped input without a non-empty `data` parameter.
    MissingData,
    /// Payload is not valid base64.
    InvalidBase64,
    /// Decoded bytes are not UTF-8.
    InvalidUtf8,
    /// Decoded text is not JSON.
    InvalidJson,
    /// JSON is valid but not an object.
    NotAnObject,
    /// A required key is absent.
    MissingField,
    /// A key is present with the wrong JSON type.
    InvalidFieldType,
    /// The disclosure context is malformed.
    InvalidContext,
    /// Strict mode: version not in the supported set.
    UnsupportedVersion,
    /// Strict mode: a field is present and typed but semantically invalid.
    InvalidFieldValue,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EmptyInput => "empty_input",
            Self::WhitespaceOnly => "whitespace_only",
            Self::InvalidInput => "invalid_input",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidVerb => "invalid_verb",
            Self::MissingData => "missing_data",
            Self::InvalidBase64 => "invalid_base64",
            Self::InvalidUtf8 => "invalid_utf8",
            Self::InvalidJson => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingField => "missing_field",
            Self::InvalidFieldType => "invalid_field_type",
            Self::InvalidContext => "invalid_context",
            Self::UnsupportedVersion => "unsupported_version",
            Self::InvalidFieldValue => "invalid_field_value",
        };
        f.write_str(s)
    }
}

/// A QR payload could not be turned into a presentation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct QrParseError {
    /// Failure class.
    pub kind: ParseErrorKind,
    /// Human-readable description, naming the field where applicable.
    pub message: String,
}

impl QrParseError {
    pub(crate) fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn missing_field(key: &str) -> Self {
        Self::new(
            ParseErrorKind::MissingField,
            format!("Missing required field: \"{key}\""),
        )
    }

    pub(crate) fn wrong_type(key: &str, expected: &str) -> Self {
        Self::new(
            ParseErrorKind::InvalidFieldType,
            format!("Field \"{key}\" must be {expected}"),
        )
    }
}

/// The presentation expired before it was checked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("presentation expired at {expires_at} (now {now})")]
pub struct ExpiredError {
    /// Expiration as Unix seconds.
    pub expires_at: i64,
    /// Time of the check as Unix seconds.
    pub now: i64,
}

impl ExpiredError {
    /// Seconds elapsed since expiry.
    pub fn expired_for_secs(&self) -> i64 {
        self.now - self.expires_at
    }

    /// True if the presentation expired no more than `tolerance_secs` ago.
    pub fn is_within_tolerance(&self, tolerance_secs: i64) -> bool {
        self.expired_for_secs() <= tolerance_secs
    }
}

/// Failure raised by the strict validator entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrValidationError {
    /// A field failed a semantic check.
    #[error("invalid {field}: {message}")]
    Field {
        /// Offending field.
        field: PresentationField,
        /// What was wrong with it.
        message: String,
    },

    /// The presentation is past its expiration.
    #[error(transparent)]
    Expired(#[from] ExpiredError),

    /// The nonce was rejected. Deliberately carries no reason.
    #[error("nonce {nonce} is invalid or has already been used")]
    Nonce {
        /// The rejected nonce value.
        nonce: u64,
    },
}

impl QrValidationError {
    /// The field the failure relates to.
    pub fn field(&self) -> PresentationField {
        match self {
            Self::Field { field, .. } => *field,
            Self::Expired(_) => PresentationField::Expiration,
            Self::Nonce { .. } => PresentationField::Nonce,
        }
    }
}

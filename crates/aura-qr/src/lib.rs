//! # aura-qr: QR Presentations
//!
//! The first two stages of the verification gate:
//!
//! - [`parser`]: raw scanned string to [`QrPresentation`], rejecting
//!   malformed transports, encodings and field types.
//! - [`validator`]: semantic checks producing a [`ValidationResult`], with an
//!   optional asynchronous nonce check through a [`NonceChecker`].
//!
//! [`presentation`] holds the model and the wire encoder used by wallets to
//! build codes.

pub mod error;
pub mod parser;
pub mod presentation;
pub mod validator;

pub use error::{ExpiredError, ParseErrorKind, QrParseError, QrValidationError};
pub use parser::{parse_qr_string, parse_qr_string_safe, ParseOptions, QrParser, SafeParseResult};
pub use presentation::{
    DisclosureContext, PresentationField, QrPresentation, DEFAULT_SCHEME, DEFAULT_VERB,
    PROTOCOL_VERSION,
};
pub use validator::{
    validate_presentation, IssueSeverity, NonceCheckError, NonceChecker, QrValidator,
    ValidationIssue, ValidationOptions, ValidationResult,
};

//! # QR Payload Parser
//!
//! Turns the raw scanned string into a [`QrPresentation`].
//!
//! ## Accepted transports
//!
//! 1. `<scheme>://<verb>?data=<base64>`: scheme and verb must match the
//!    configured ones and `data` must be non-empty.
//! 2. A bare base64 string.
//!
//! Both standard and URL-safe base64 alphabets are accepted, with or without
//! padding.
//!
//! ## Field extraction
//!
//! The decoded JSON is read key by key into the fixed presentation struct.
//! Unknown keys are ignored. Context keys that name object-prototype slots
//! in dynamic runtimes (`__proto__`, `prototype`, `constructor`) are dropped,
//! so a payload built to attack a JavaScript verifier cannot smuggle them
//! through this one into downstream JSON consumers.
//!
//! ## Strict mode
//!
//! On by default. Adds semantic checks on top of the structural ones:
//! supported version, non-blank IDs/holder/signature, at least one
//! credential ID with none blank, and an expiration no more than two years
//! in the past or ten years in the future.

use std::sync::Arc;

use aura_core::sanitize::{is_base64, sanitize_text};
use aura_core::{Clock, SanitizeError, SystemClock};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParseErrorKind, QrParseError};
use crate::presentation::{DisclosureContext, QrPresentation, DEFAULT_SCHEME, DEFAULT_VERB, PROTOCOL_VERSION};

const SECS_PER_YEAR: i64 = 365 * 24 * 60 * 60;
const MAX_PAST_SECS: i64 = 2 * SECS_PER_YEAR;
const MAX_FUTURE_SECS: i64 = 10 * SECS_PER_YEAR;

const FORBIDDEN_CONTEXT_KEYS: &[&str] = &["__proto__", "prototype", "constructor"];

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Parser configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Apply semantic checks in addition to structural ones.
    pub strict: bool,
    /// Versions accepted in strict mode.
    pub supported_versions: Vec<String>,
    /// Expected URL scheme.
    pub scheme: String,
    /// Expected URL verb.
    pub verb: String,
    /// Upper bound on the raw input, in characters.
    pub max_input_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: true,
            supported_versions: vec![PROTOCOL_VERSION.to_string()],
            scheme: DEFAULT_SCHEME.to_string(),
            verb: DEFAULT_VERB.to_string(),
            max_input_len: 8 * 1024,
        }
    }
}

impl ParseOptions {
    /// Default options with strict mode off.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }
}

/// Non-failing parse outcome for UI and CLI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeParseResult {
    /// True if `data` is populated.
    pub success: bool,
    /// The parsed presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QrPresentation>,
    /// The failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QrParseError>,
}

impl From<Result<QrPresentation, QrParseError>> for SafeParseResult {
    fn from(result: Result<QrPresentation, QrParseError>) -> Self {
        match result {
            Ok(p) => Self {
                success: true,
                data: Some(p),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(e),
            },
        }
    }
}

/// QR payload parser bound to a clock.
#[derive(Debug, Clone)]
pub struct QrParser {
    options: ParseOptions,
    clock: Arc<dyn Clock>,
}

impl Default for QrParser {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

impl QrParser {
    /// Parser using the system clock.
    pub fn new(options: ParseOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Parser using an injected clock.
    pub fn with_clock(options: ParseOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    /// The active options.
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Parse a raw scanned string.
    ///
    /// # Errors
    ///
    /// [`QrParseError`] with the [`ParseErrorKind`] of the first failure.
    pub fn parse(&self, raw: &str) -> Result<QrPresentation, QrParseError> {
        let result = self.parse_inner(raw);
        if let Err(ref e) = result {
            tracing::debug!(kind = %e.kind, error = %e.message, "QR payload rejected");
        }
        result
    }

    /// Parse without failing; the outcome is folded into a [`SafeParseResult`].
    pub fn parse_safe(&self, raw: &str) -> SafeParseResult {
        self.parse(raw).into()
    }

    fn parse_inner(&self, raw: &str) -> Result<QrPresentation, QrParseError> {
        if raw.is_empty() {
            return Err(QrParseError::new(ParseErrorKind::EmptyInput, "Input is empty"));
        }
        if raw.trim().is_empty() {
            return Err(QrParseError::new(
                ParseErrorKind::WhitespaceOnly,
                "Input contains only whitespace",
            ));
        }
        let input = sanitize_text(raw, self.options.max_input_len).map_err(|e| match e {
            SanitizeError::TooLong { max, actual } => QrParseError::new(
                ParseErrorKind::InvalidInput,
                format!("Input too long: {actual} characters (max {max})"),
            ),
            other => QrParseError::new(ParseErrorKind::InvalidInput, format!("Invalid input: {other}")),
        })?;

        let encoded = if input.contains("://") {
            self.extract_url_data(&input)?
        } else {
            input
        };

        let json = decode_payload(&encoded)?;
        let obj = match json {
            Value::Object(map) => map,
            _ => {
                return Err(QrParseError::new(
                    ParseErrorKind::NotAnObject,
                    "Payload must be a JSON object",
                ))
            }
        };

        let presentation = extract_presentation(&obj)?;
        if self.options.strict {
            self.check_strict(&presentation)?;
        }
        Ok(presentation)
    }

    fn extract_url_data(&self, input: &str) -> Result<String, QrParseError> {
        let url = url::Url::parse(input)
            .map_err(|e| QrParseError::new(ParseErrorKind::InvalidUrl, format!("Invalid URL: {e}")))?;
        if !url.scheme().eq_ignore_ascii_case(&self.options.scheme) {
            return Err(QrParseError::new(
                ParseErrorKind::InvalidUrl,
                format!(
                    "Invalid URL scheme \"{}\" (expected \"{}\")",
                    url.scheme(),
                    self.options.scheme
                ),
            ));
        }
        let verb = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => url.path().trim_matches('/').to_string(),
        };
        if verb != self.options.verb {
            return Err(QrParseError::new(
                ParseErrorKind::InvalidVerb,
                format!("Invalid URL verb \"{verb}\" (expected \"{}\")", self.options.verb),
            ));
        }
        // query_pairs decodes '+' to ' ', which would corrupt standard base64.
        let data = url
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.replace(' ', "+"))
            .unwrap_or_default();
        if data.is_empty() {
            return Err(QrParseError::new(
                ParseErrorKind::MissingData,
                "Missing \"data\" parameter",
            ));
        }
        Ok(data)
    }

    fn check_strict(&self, p: &QrPresentation) -> Result<(), QrParseError> {
        if !self.options.supported_versions.iter().any(|v| v == &p.version) {
            return Err(QrParseError::new(
                ParseErrorKind::UnsupportedVersion,
                format!(
                    "Unsupported version \"{}\" (supported: {})",
                    p.version,
                    self.options.supported_versions.join(", ")
                ),
            ));
        }
        let invalid = |msg: String| QrParseError::new(ParseErrorKind::InvalidFieldValue, msg);
        if p.presentation_id.trim().is_empty() {
            return Err(invalid("Field \"p\" must not be empty".into()));
        }
        if p.holder_did.trim().is_empty() {
            return Err(invalid("Field \"h\" must not be empty".into()));
        }
        if p.signature.trim().is_empty() {
            return Err(invalid("Field \"sig\" must not be empty".into()));
        }
        if p.credential_ids.is_empty() {
            return Err(invalid("Field \"vcs\" must not be empty".into()));
        }
        if let Some(i) = p.credential_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(invalid(format!("Field \"vcs\" contains an empty entry at index {i}")));
        }
        if p.expiration <= 0 {
            return Err(invalid("Field \"exp\" must be a positive Unix timestamp".into()));
        }
        let now = self.clock.now_secs();
        if p.expiration < now - MAX_PAST_SECS {
            return Err(invalid("Field \"exp\" is too far in the past".into()));
        }
        if p.expiration > now + MAX_FUTURE_SECS {
            return Err(invalid("Field \"exp\" is too far in the future".into()));
        }
        Ok(())
    }
}

/// Parse with the given options and the system clock.
///
/// # Errors
///
/// See [`QrParser::parse`].
pub fn parse_qr_string(raw: &str, options: &ParseOptions) -> Result<QrPresentation, QrParseError> {
    QrParser::new(options.clone()).parse(raw)
}

/// Non-failing variant of [`parse_qr_string`].
pub fn parse_qr_string_safe(raw: &str, options: &ParseOptions) -> SafeParseResult {
    QrParser::new(options.clone()).parse_safe(raw)
}

fn decode_payload(encoded: &str) -> Result<Value, QrParseError> {
    let trimmed = encoded.trim();
    if !is_base64(trimmed) {
        return Err(QrParseError::new(
            ParseErrorKind::InvalidBase64,
            "Payload is not valid base64",
        ));
    }
    let normalized: String = trimmed
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let bytes = LENIENT_BASE64.decode(normalized.as_bytes()).map_err(|e| {
        QrParseError::new(
            ParseErrorKind::InvalidBase64,
            format!("Payload is not valid base64: {e}"),
        )
    })?;
    let text = String::from_utf8(bytes).map_err(|_| {
        QrParseError::new(ParseErrorKind::InvalidUtf8, "Payload is not valid UTF-8")
    })?;
    serde_json::from_str(&text)
        .map_err(|e| QrParseError::new(ParseErrorKind::InvalidJson, format!("Payload is not valid JSON: {e}")))
}

fn extract_presentation(obj: &Map<String, Value>) -> Result<QrPresentation, QrParseError> {
    Ok(QrPresentation {
        version: required_string(obj, "v")?,
        presentation_id: required_string(obj, "p")?,
        holder_did: required_string(obj, "h")?,
        credential_ids: required_string_array(obj, "vcs")?,
        context: required_context(obj, "ctx")?,
        expiration: required_integer(obj, "exp")?,
        nonce: required_nonce(obj, "n")?,
        signature: required_string(obj, "sig")?,
    })
}

fn required<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value, QrParseError> {
    match obj.get(key) {
        Some(Value::Null) | None => Err(QrParseError::missing_field(key)),
        Some(v) => Ok(v),
    }
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Result<String, QrParseError> {
    required(obj, key)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| QrParseError::wrong_type(key, "a string"))
}

fn required_string_array(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>, QrParseError> {
    let arr = required(obj, key)?
        .as_array()
        .ok_or_else(|| QrParseError::wrong_type(key, "an array"))?;
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| QrParseError::wrong_type(key, "an array of strings"))
        })
        .collect()
}

fn required_context(obj: &Map<String, Value>, key: &str) -> Result<DisclosureContext, QrParseError> {
    let map = match required(obj, key)? {
        Value::Object(map) => map,
        _ => {
            return Err(QrParseError::new(
                ParseErrorKind::InvalidContext,
                format!("Field \"{key}\" must be an object"),
            ))
        }
    };
    let mut ctx = DisclosureContext::new();
    for (k, v) in map {
        if FORBIDDEN_CONTEXT_KEYS.contains(&k.as_str()) {
            tracing::debug!(key = %k, "dropping reserved context key");
            continue;
        }
        let flag = v.as_bool().ok_or_else(|| {
            QrParseError::new(
                ParseErrorKind::InvalidContext,
                format!("Context field \"{k}\" must be a boolean"),
            )
        })?;
        ctx.insert(k.clone(), flag);
    }
    Ok(ctx)
}

fn required_integer(obj: &Map<String, Value>, key: &str) -> Result<i64, QrParseError> {
    required(obj, key)?
        .as_i64()
        .ok_or_else(|| QrParseError::wrong_type(key, "an integer"))
}

fn required_nonce(obj: &Map<String, Value>, key: &str) -> Result<u64, QrParseError> {
    required(obj, key)?
        .as_u64()
        .ok_or_else(|| QrParseError::wrong_type(key, "a non-negative integer"))
}

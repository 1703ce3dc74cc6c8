//! # Input Sanitizer
//!
//! Validation and escaping helpers for strings that arrive from outside the
//! process: QR payloads, identifiers, free-text audit fields.
//!
//! Rejection is preferred over repair. [`sanitize_text`] strips control
//! characters because they are never meaningful in these fields, but a NUL
//! byte or an oversized input is an error, not something to silently trim.

use serde::{Deserialize, Serialize};

use crate::error::SanitizeError;

/// Trim, bound and clean a free-text input.
///
/// Control characters other than `\n` and `\t` are removed. The length bound
/// is checked in characters after trimming.
///
/// # Errors
///
/// [`SanitizeError::NulByte`] if the input contains `\0`;
/// [`SanitizeError::TooLong`] if it exceeds `max_chars`.
pub fn sanitize_text(input: &str, max_chars: usize) -> Result<String, SanitizeError> {
    if input.contains('\0') {
        return Err(SanitizeError::NulByte);
    }
    let trimmed = input.trim();
    let actual = trimmed.chars().count();
    if actual > max_chars {
        return Err(SanitizeError::TooLong {
            max: max_chars,
            actual,
        });
    }
    Ok(trimmed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect())
}

/// Escape the characters significant in HTML text and attribute contexts.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
    }
    out
}

/// True if `s` is non-empty and consists only of ASCII hex digits.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize a hex string: trim, strip an optional `0x` prefix, lowercase.
///
/// # Errors
///
/// [`SanitizeError::InvalidHex`] if the result is empty, has odd length or
/// contains a non-hex character.
pub fn sanitize_hex(s: &str) -> Result<String, SanitizeError> {
    let trimmed = s.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !is_hex(body) {
        return Err(SanitizeError::InvalidHex("non-hex character or empty".into()));
    }
    if body.len() % 2 != 0 {
        return Err(SanitizeError::InvalidHex(format!(
            "odd length {}",
            body.len()
        )));
    }
    Ok(body.to_ascii_lowercase())
}

/// True if `s` is non-empty and limited to `[A-Za-z0-9._:-]`.
pub fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

/// Category of injection payload recognized by [`detect_injection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    /// `<script`, inline event handlers, `<iframe`.
    Markup,
    /// `javascript:` / `vbscript:` / `data:text/html` URIs.
    ScriptUri,
    /// SQL tautologies, comment sequences, stacked statements.
    Sql,
    /// Template interpolation (`{{ }}`, `${ }`, `<% %>`).
    Template,
    /// `../` or `..\` path traversal, including percent-encoded forms.
    PathTraversal,
}

impl std::fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Markup => "markup",
            Self::ScriptUri => "script_uri",
            Self::Sql => "sql",
            Self::Template => "template",
            Self::PathTraversal => "path_traversal",
        };
        f.write_str(s)
    }
}

const MARKUP_PATTERNS: &[&str] = &["<script", "</script", "<iframe", "onerror=", "onload=", "<svg"];
const SCRIPT_URI_PATTERNS: &[&str] = &["javascript:", "vbscript:", "data:text/html"];
const SQL_PATTERNS: &[&str] = &[
    "' or '1'='1",
    "\" or \"1\"=\"1",
    " or 1=1",
    "'--",
    "';",
    "union select",
    "drop table",
    "/*",
];
const TEMPLATE_PATTERNS: &[&str] = &["{{", "${", "<%"];
const TRAVERSAL_PATTERNS: &[&str] = &["../", "..\\", "%2e%2e%2f", "%2e%2e/", "..%2f"];

/// Detect a common injection payload. Matching is case-insensitive.
pub fn detect_injection(s: &str) -> Option<InjectionKind> {
    let lower = s.to_ascii_lowercase();
    let hit = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));
    if hit(MARKUP_PATTERNS) {
        Some(InjectionKind::Markup)
    } else if hit(SCRIPT_URI_PATTERNS) {
        Some(InjectionKind::ScriptUri)
    } else if hit(SQL_PATTERNS) {
        Some(InjectionKind::Sql)
    } else if hit(TEMPLATE_PATTERNS) {
        Some(InjectionKind::Template)
    } else if hit(TRAVERSAL_PATTERNS) {
        Some(InjectionKind::PathTraversal)
    } else {
        None
    }
}

/// True if `s` is plausibly base64: standard or URL-safe alphabet, with at
/// most two trailing `=` padding characters and no interior padding.
pub fn is_base64(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let body = s.trim_end_matches('=');
    let padding = s.len() - body.len();
    if padding > 2 || body.is_empty() {
        return false;
    }
    if padding > 0 && s.len() % 4 != 0 {
        return false;
    }
    body.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'-' | b'_'))
}

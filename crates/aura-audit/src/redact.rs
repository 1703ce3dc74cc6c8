//! Metadata redaction.

use serde_json::{Map, Value};

/// Replacement for every sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Keys redacted unless the configuration says otherwise.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "signature",
    "sig",
    "private_key",
    "privatekey",
    "secret",
    "password",
    "token",
    "api_key",
    "apikey",
    "credential",
    "credentials",
    "seed",
    "mnemonic",
    "authorization",
];

/// Case-insensitive key matcher.
#[derive(Debug, Clone)]
pub struct Redactor {
    keys: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS.iter().copied())
    }
}

impl Redactor {
    /// Matcher for the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().map(|k| k.as_ref().to_ascii_lowercase()).collect(),
        }
    }

    /// True if `key` is sensitive.
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.keys.iter().any(|k| *k == key)
    }

    /// Replace sensitive values throughout `map`, at any depth.
    pub fn redact_map(&self, map: &mut Map<String, Value>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::String(REDACTED.to_owned());
            } else {
                self.redact_value(value);
            }
        }
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => self.redact_map(map),
            Value::Array(items) => items.iter_mut().for_each(|v| self.redact_value(v)),
            _ => {}
        }
    }
}

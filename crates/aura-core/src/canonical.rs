//! # Canonical JSON Bytes
//!
//! [`CanonicalBytes`] is what the digest helpers hash and what holder
//! signatures cover. Its field is private and [`CanonicalBytes::new`] is the
//! only constructor, so every hashed or signed byte string has gone through
//! the same coercion and RFC 8785 (JCS) serialization. An audit entry or a
//! presentation signing payload produces identical bytes on every host.
//!
//! ## Coercion Rules
//!
//! 1. `null`, `bool`, `string`, integers pass through unchanged.
//! 2. Non-integer floats are rendered as their shortest decimal string.
//!    Threat evidence carries ratios such as requests-per-second; keeping
//!    them as JSON numbers would make the chain hash depend on float
//!    formatting.
//! 3. Objects and arrays are recursed.
//!
//! After coercion, serialization uses `serde_jcs`: sorted keys, compact
//! separators, deterministic byte sequence.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by JCS canonicalization with float coercion.
///
/// # Invariants
///
/// - The only constructor is `CanonicalBytes::new()`.
/// - No JSON float appears in the output; floats become strings.
/// - Object keys are sorted, separators are compact (RFC 8785).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalizationError::SerializationFailed` if the value
    /// cannot be represented as JSON (e.g. a map with non-string keys).
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        let coerced = coerce_json_value(value);
        let s = serde_jcs::to_string(&coerced)?;
        Ok(Self(s.into_bytes()))
    }

    /// Access the canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// View the canonical bytes as a UTF-8 string. JCS output is always UTF-8.
    pub fn as_str(&self) -> &str {
        // serde_jcs produces a String, so this never fails.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Returns the length of the canonical byte sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the canonical byte sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn coerce_json_value(value: Value) -> Value {
    match value {
        Value::Number(ref n) if n.is_f64() => match n.as_f64() {
            Some(f) => Value::String(format!("{f}")),
            None => value,
        },
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, coerce_json_value(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.into_iter().map(coerce_json_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_keys_compact_separators() {
        let data = serde_json::json!({"b": 2, "a": 1, "c": "hello"});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(cb.as_str(), r#"{"a":1,"b":2,"c":"hello"}"#);
    }

    #[test]
    fn nested_objects_sorted() {
        let data = serde_json::json!({
            "outer": {"b": 2, "a": 1},
            "list": [3, 2, 1]
        });
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(cb.as_str(), r#"{"list":[3,2,1],"outer":{"a":1,"b":2}}"#);
    }

    #[test]
    fn floats_become_strings() {
        let data = serde_json::json!({"rps": 1.5, "nested": [{"ratio": 0.25}]});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(cb.as_str(), r#"{"nested":[{"ratio":"0.25"}],"rps":"1.5"}"#);
    }

    #[test]
    fn integers_untouched() {
        let data = serde_json::json!({"n": 42, "neg": -7, "big": 9_999_999_999i64});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(cb.as_str(), r#"{"big":9999999999,"n":42,"neg":-7}"#);
    }

    #[test]
    fn empty_object() {
        let cb = CanonicalBytes::new(&serde_json::json!({})).unwrap();
        assert_eq!(cb.as_bytes(), b"{}");
        assert!(!cb.is_empty());
        assert_eq!(cb.len(), 2);
    }

    #[test]
    fn unicode_passthrough() {
        let data = serde_json::json!({"name": "\u{00e9}t\u{00e9}"});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert!(cb.as_str().contains('\u{00e9}'));
    }

    #[test]
    fn non_string_map_keys_rejected() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(CanonicalBytes::new(&map).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| serde_json::json!(n)),
            (-1.0e6f64..1.0e6).prop_map(|f| serde_json::json!(f)),
            "[a-zA-Z0-9_ ]{0,30}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn contains_float(v: &Value) -> bool {
        match v {
            Value::Number(n) => n.is_f64(),
            Value::Array(a) => a.iter().any(contains_float),
            Value::Object(m) => m.values().any(contains_float),
            _ => false,
        }
    }

    proptest! {
        #[test]
        fn canonicalization_is_deterministic(value in json_value()) {
            let a = CanonicalBytes::new(&value).unwrap();
            let b = CanonicalBytes::new(&value).unwrap();
            prop_assert_eq!(a.as_bytes(), b.as_bytes());
        }

        #[test]
        fn canonical_output_is_float_free_json(value in json_value()) {
            let cb = CanonicalBytes::new(&value).unwrap();
            let parsed: Value = serde_json::from_slice(cb.as_bytes()).unwrap();
            prop_assert!(!contains_float(&parsed));
        }
    }
}

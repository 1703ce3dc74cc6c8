//! Verifier configuration.
//!
//! Defaults are safe for production. A YAML file may override any subset of
//! fields, and `AURA_*` environment variables override the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AURA_VERIFIER_ID` | `verifier_id` |
//! | `AURA_PARSE_STRICT` | `parse.strict` |
//! | `AURA_NONCE_WINDOW_MS` | `nonce.window_ms` |
//! | `AURA_NONCE_CLOCK_SKEW_MS` | `nonce.clock_skew_ms` |
//! | `AURA_RATE_LIMIT_MAX_REQUESTS` | `rate_limit.max_requests` |
//! | `AURA_RATE_LIMIT_WINDOW_MS` | `rate_limit.window_ms` |
//! | `AURA_RATE_LIMIT_BURST` | `rate_limit.burst_capacity` |
//! | `AURA_JITTER_ENABLED` | `jitter.enabled` |
//! | `AURA_THREAT_AUTO_BLOCK` | `threat.auto_block` |
//! | `AURA_AUDIT_LOG_PATH` | `audit_log_path` |
//! | `AURA_BATCH_MAX_CONCURRENCY` | `batch.max_concurrency` |
//! | `AURA_BATCH_TIMEOUT_MS` | `batch.timeout_ms` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use aura_audit::AuditConfig;
use aura_qr::{ParseOptions, ValidationOptions};
use aura_security::{JitterConfig, NonceConfig, RateLimitConfig, ThreatConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Nonce storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NonceBackend {
    /// Exact map. Memory grows with traffic inside the window.
    Memory,
    /// Rotating bloom filter. Bounded memory, rare false replays.
    ///
    /// A nonce is held for one rotation interval only, so presentations
    /// that expire later than `retention_ms` from now are refused.
    Bloom {
        /// Nonces expected per rotation interval.
        expected_items: usize,
        /// Target false positive rate per generation.
        false_positive_rate: f64,
        /// Rotation interval. Defaults to the nonce window plus clock
        /// skew and is never shorter than that.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retention_ms: Option<i64>,
    },
}

impl Default for NonceBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Concurrency and time budget for batch verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Verifications in flight at once. Excess items queue.
    pub max_concurrency: usize,
    /// Wall-clock budget for the whole batch.
    pub timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            timeout_ms: 30_000,
        }
    }
}

/// Everything a [`Verifier`](crate::Verifier) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Recorded as the actor of verification audit entries.
    pub verifier_id: String,
    pub parse: ParseOptions,
    pub validation: ValidationOptions,
    pub nonce: NonceConfig,
    pub nonce_backend: NonceBackend,
    /// Per-identifier limit.
    pub rate_limit: RateLimitConfig,
    /// Optional limit shared by all callers.
    pub global_rate_limit: Option<RateLimitConfig>,
    pub jitter: JitterConfig,
    pub threat: ThreatConfig,
    pub audit: AuditConfig,
    /// JSON lines audit file. In memory when unset.
    pub audit_log_path: Option<PathBuf>,
    pub batch: BatchConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            verifier_id: "aura-verifier".to_string(),
            parse: ParseOptions::default(),
            validation: ValidationOptions::default(),
            nonce: NonceConfig::default(),
            nonce_backend: NonceBackend::default(),
            rate_limit: RateLimitConfig::default(),
            global_rate_limit: None,
            jitter: JitterConfig::default(),
            threat: ThreatConfig::default(),
            audit: AuditConfig::default(),
            audit_log_path: None,
            batch: BatchConfig::default(),
        }
    }
}

impl VerifierConfig {
    /// Load from an optional YAML file, apply `AURA_*` overrides from the
    /// process environment, and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the file cannot be read or parsed, an override is
    /// malformed, or the result fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file without applying overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML text without applying overrides. Empty input yields defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`].
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `AURA_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] naming the first malformed variable.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(id) = lookup("AURA_VERIFIER_ID") {
            self.verifier_id = id;
        }
        override_bool(&lookup, "AURA_PARSE_STRICT", &mut self.parse.strict)?;
        override_parsed(&lookup, "AURA_NONCE_WINDOW_MS", &mut self.nonce.window_ms)?;
        override_parsed(&lookup, "AURA_NONCE_CLOCK_SKEW_MS", &mut self.nonce.clock_skew_ms)?;
        override_parsed(&lookup, "AURA_RATE_LIMIT_MAX_REQUESTS", &mut self.rate_limit.max_requests)?;
        override_parsed(&lookup, "AURA_RATE_LIMIT_WINDOW_MS", &mut self.rate_limit.window_ms)?;
        override_parsed(&lookup, "AURA_RATE_LIMIT_BURST", &mut self.rate_limit.burst_capacity)?;
        override_bool(&lookup, "AURA_JITTER_ENABLED", &mut self.jitter.enabled)?;
        override_bool(&lookup, "AURA_THREAT_AUTO_BLOCK", &mut self.threat.auto_block)?;
        if let Some(path) = lookup("AURA_AUDIT_LOG_PATH") {
            self.audit_log_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        override_parsed(&lookup, "AURA_BATCH_MAX_CONCURRENCY", &mut self.batch.max_concurrency)?;
        override_parsed(&lookup, "AURA_BATCH_TIMEOUT_MS", &mut self.batch.timeout_ms)?;
        Ok(())
    }

    /// Reject values no deployment should run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verifier_id.trim().is_empty() {
            return invalid("verifier_id", "must not be empty");
        }
        if self.parse.max_input_len == 0 {
            return invalid("parse.max_input_len", "must be positive");
        }
        if self.nonce.window_ms <= 0 {
            return invalid("nonce.window_ms", "must be positive");
        }
        if self.nonce.clock_skew_ms < 0 {
            return invalid("nonce.clock_skew_ms", "must not be negative");
        }
        if let NonceBackend::Bloom {
            expected_items,
            false_positive_rate,
            retention_ms,
        } = &self.nonce_backend
        {
            if *expected_items == 0 {
                return invalid("nonce_backend.expected_items", "must be positive");
            }
            if !(*false_positive_rate > 0.0 && *false_positive_rate < 1.0) {
                return invalid("nonce_backend.false_positive_rate", "must be in (0, 1)");
            }
            if retention_ms.is_some_and(|ms| ms <= 0) {
                return invalid("nonce_backend.retention_ms", "must be positive");
            }
        }
        validate_rate_limit("rate_limit", &self.rate_limit)?;
        if let Some(global) = &self.global_rate_limit {
            validate_rate_limit("global_rate_limit", global)?;
        }
        if self.threat.rapid_request_window_ms <= 0 {
            return invalid("threat.rapid_request_window_ms", "must be positive");
        }
        if self.threat.max_requests_per_window == 0 {
            return invalid("threat.max_requests_per_window", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.threat.geo_sensitivity) {
            return invalid("threat.geo_sensitivity", "must be in [0, 1]");
        }
        if self.threat.retention_ms <= 0 {
            return invalid("threat.retention_ms", "must be positive");
        }
        if self.audit.buffer_size == 0 {
            return invalid("audit.buffer_size", "must be positive");
        }
        if self.batch.max_concurrency == 0 {
            return invalid("batch.max_concurrency", "must be positive");
        }
        if self.batch.timeout_ms == 0 {
            return invalid("batch.timeout_ms", "must be positive");
        }
        Ok(())
    }
}

fn validate_rate_limit(prefix: &str, config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.window_ms == 0 {
        return invalid(&format!("{prefix}.window_ms"), "must be positive");
    }
    if config.max_requests == 0 {
        return invalid(&format!("{prefix}.max_requests"), "must be positive");
    }
    if config.burst_capacity == 0 {
        return invalid(&format!("{prefix}.burst_capacity"), "must be positive");
    }
    if config.base_backoff_ms > config.max_backoff_ms {
        return invalid(
            &format!("{prefix}.base_backoff_ms"),
            &format!("{} exceeds max_backoff_ms {}", config.base_backoff_ms, config.max_backoff_ms),
        );
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Env {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn override_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(var) {
        *target = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::Env {
                    var: var.to_string(),
                    value: raw,
                })
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        VerifierConfig::default().validate().unwrap();
        assert_eq!(VerifierConfig::from_yaml_str("").unwrap(), VerifierConfig::default());
    }

    #[test]
    fn yaml_overrides_subset() {
        let yaml = r#"
verifier_id: gate-7
nonce:
  window_ms: 60000
nonce_backend:
  kind: bloom
  expected_items: 10000
  false_positive_rate: 0.001
rate_limit:
  max_requests: 5
  burst_capacity: 5
batch:
  max_concurrency: 4
"#;
        let config = VerifierConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.verifier_id, "gate-7");
        assert_eq!(config.nonce.window_ms, 60_000);
        assert_eq!(config.nonce.clock_skew_ms, NonceConfig::default().clock_skew_ms);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.batch.max_concurrency, 4);
        assert!(matches!(config.nonce_backend, NonceBackend::Bloom { expected_items: 10_000, .. }));
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = VerifierConfig::default();
        config
            .apply_env(env(&[
                ("AURA_NONCE_WINDOW_MS", "1000"),
                ("AURA_RATE_LIMIT_MAX_REQUESTS", " 7 "),
                ("AURA_BATCH_MAX_CONCURRENCY", "2"),
                ("AURA_JITTER_ENABLED", "false"),
                ("AURA_AUDIT_LOG_PATH", "/var/log/aura.jsonl"),
            ]))
            .unwrap();
        assert_eq!(config.nonce.window_ms, 1_000);
        assert_eq!(config.rate_limit.max_requests, 7);
        assert_eq!(config.batch.max_concurrency, 2);
        assert!(!config.jitter.enabled);
        assert_eq!(config.audit_log_path, Some(PathBuf::from("/var/log/aura.jsonl")));
    }

    #[test]
    fn malformed_env_names_the_variable() {
        let mut config = VerifierConfig::default();
        let err = config.apply_env(env(&[("AURA_JITTER_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "AURA_JITTER_ENABLED"));
        let err = config.apply_env(env(&[("AURA_NONCE_WINDOW_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("AURA_NONCE_WINDOW_MS"));
    }

    #[test]
    fn validation_rejects_misconfiguration() {
        let mut config = VerifierConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "rate_limit.window_ms"
        ));

        let mut config = VerifierConfig::default();
        config.global_rate_limit = Some(RateLimitConfig {
            base_backoff_ms: 10,
            max_backoff_ms: 5,
            ..RateLimitConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "global_rate_limit.base_backoff_ms"
        ));

        let mut config = VerifierConfig::default();
        config.batch.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = VerifierConfig::default();
        config.nonce_backend = NonceBackend::Bloom {
            expected_items: 100,
            false_positive_rate: 1.5,
            retention_ms: None,
        };
        assert!(config.validate().is_err());

        let mut config = VerifierConfig::default();
        config.nonce_backend = NonceBackend::Bloom {
            expected_items: 100,
            false_positive_rate: 0.01,
            retention_ms: Some(0),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "nonce_backend.retention_ms"
        ));
    }

    #[test]
    fn mistyped_yaml_is_an_error() {
        assert!(matches!(
            VerifierConfig::from_yaml_str("nonce:\n  window_ms: soon\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}

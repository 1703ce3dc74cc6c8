//! Audit events and chained entries.

use aura_core::{chain_digest, CanonicalBytes, CanonicalizationError, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What part of the gate produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// A presentation verification.
    Verification,
    /// A security decision (block, replay, injection).
    Security,
    /// Rate-limit admission.
    RateLimit,
    /// Threat detection.
    Threat,
    /// Configuration load or change.
    Configuration,
    /// Lifecycle and maintenance.
    System,
}

impl AuditCategory {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Security => "security",
            Self::RateLimit => "rate_limit",
            Self::Threat => "threat",
            Self::Configuration => "configuration",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Completed as intended.
    Success,
    /// Rejected on its merits.
    Failure,
    /// Refused by a security control.
    Blocked,
    /// Could not be completed.
    Error,
}

impl AuditOutcome {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine.
    Info,
    /// Unusual.
    Warning,
    /// Failed.
    Error,
    /// Needs immediate attention.
    Critical,
}

impl AuditSeverity {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// Something to record. The logger turns it into an [`AuditEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Producing component.
    pub category: AuditCategory,
    /// Short machine-readable verb, e.g. `verify_presentation`.
    pub action: String,
    /// Result.
    pub outcome: AuditOutcome,
    /// Importance.
    pub severity: AuditSeverity,
    /// Who acted.
    pub actor: Option<String>,
    /// What was acted on.
    pub target: Option<String>,
    /// Human-readable summary.
    pub message: String,
    /// Structured detail. Sensitive keys are redacted before storage.
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    /// An info-level event with no actor, target or metadata.
    pub fn new(
        category: AuditCategory,
        action: impl Into<String>,
        outcome: AuditOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            action: action.into(),
            outcome,
            severity: AuditSeverity::Info,
            actor: None,
            target: None,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Set the severity.
    #[must_use]
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the actor.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the target.
    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add one metadata field.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge an object into the metadata. Non-object values are stored
    /// under `"detail"`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("detail".into(), other);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// A committed, chained record.
///
/// `hash = SHA-256(previous_hash ∥ JCS(entry without hash))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, from 0.
    pub sequence: u64,
    /// When the entry was appended.
    pub timestamp: Timestamp,
    /// Producing component.
    pub category: AuditCategory,
    /// Machine-readable verb.
    pub action: String,
    /// Result.
    pub outcome: AuditOutcome,
    /// Importance.
    pub severity: AuditSeverity,
    /// Who acted.
    pub actor: Option<String>,
    /// What was acted on.
    pub target: Option<String>,
    /// Human-readable summary.
    pub message: String,
    /// Redacted structured detail.
    pub metadata: Map<String, Value>,
    /// The predecessor's `hash`, or the genesis value.
    pub previous_hash: String,
    /// This entry's chain hash, lowercase hex.
    pub hash: String,
}

#[derive(Serialize)]
struct HashedFields<'a> {
    sequence: u64,
    timestamp: &'a Timestamp,
    category: AuditCategory,
    action: &'a str,
    outcome: AuditOutcome,
    severity: AuditSeverity,
    actor: &'a Option<String>,
    target: &'a Option<String>,
    message: &'a str,
    metadata: &'a Map<String, Value>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Seal `event` as entry `sequence` after `previous_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if the metadata cannot be
    /// canonicalized.
    pub fn seal(
        event: AuditEvent,
        sequence: u64,
        timestamp: Timestamp,
        previous_hash: impl Into<String>,
    ) -> Result<Self, CanonicalizationError> {
        let mut entry = Self {
            sequence,
            timestamp,
            category: event.category,
            action: event.action,
            outcome: event.outcome,
            severity: event.severity,
            actor: event.actor,
            target: event.target,
            message: event.message,
            metadata: event.metadata,
            previous_hash: previous_hash.into(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute the chain hash from the current field values.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if the entry cannot be
    /// canonicalized.
    pub fn compute_hash(&self) -> Result<String, CanonicalizationError> {
        let body = CanonicalBytes::new(&HashedFields {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            category: self.category,
            action: &self.action,
            outcome: self.outcome,
            severity: self.severity,
            actor: &self.actor,
            target: &self.target,
            message: &self.message,
            metadata: &self.metadata,
            previous_hash: &self.previous_hash,
        })?;
        Ok(chain_digest(&self.previous_hash, &body).to_hex())
    }
}

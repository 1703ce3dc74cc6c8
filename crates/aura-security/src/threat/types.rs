//! Threat taxonomy and event records.

use aura_core::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ThreatType
// ---------------------------------------------------------------------------

/// Category of suspicious behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// Request volume above the per-window ceiling.
    RapidRequests,
    /// Request from a location disproportionately new for the identifier.
    GeographicAnomaly,
    /// Many distinct targets tried in a short window.
    CredentialStuffing,
    /// A presentation or nonce seen before.
    ReplayAttack,
    /// Repeated failed verifications.
    BruteForce,
    /// Input matched a known attack pattern.
    SuspiciousPattern,
    /// Behavior outside the identifier's usual profile.
    UnusualBehavior,
    /// Activity from an identifier already on the block list.
    KnownMalicious,
}

impl ThreatType {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidRequests => "rapid_requests",
            Self::GeographicAnomaly => "geographic_anomaly",
            Self::CredentialStuffing => "credential_stuffing",
            Self::ReplayAttack => "replay_attack",
            Self::BruteForce => "brute_force",
            Self::SuspiciousPattern => "suspicious_pattern",
            Self::UnusualBehavior => "unusual_behavior",
            Self::KnownMalicious => "known_malicious",
        }
    }

    /// Suggested operator response.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::RapidRequests => "Throttle or temporarily block the identifier",
            Self::GeographicAnomaly => "Confirm the holder is travelling or the device is legitimate",
            Self::CredentialStuffing => "Block the identifier and notify affected targets",
            Self::ReplayAttack => "Treat the presentation as captured; ask the holder for a fresh code",
            Self::BruteForce => "Block the identifier and review recent presentations",
            Self::SuspiciousPattern => "Inspect the submitted input and the identifier's recent activity",
            Self::UnusualBehavior => "Review the identifier's recent activity",
            Self::KnownMalicious => "No action needed; request refused",
        }
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ThreatLevel
// ---------------------------------------------------------------------------

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// Informational.
    Low,
    /// Worth a look.
    Medium,
    /// Likely abuse.
    High,
    /// Act now. Eligible for automatic blocking.
    Critical,
}

impl ThreatLevel {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ThreatEvent
// ---------------------------------------------------------------------------

/// One detected threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the threat was detected.
    pub timestamp: Timestamp,
    /// Category.
    pub threat_type: ThreatType,
    /// Severity.
    pub level: ThreatLevel,
    /// The identifier the threat is attributed to.
    pub entity: String,
    /// Human-readable summary.
    pub description: String,
    /// Detector-specific measurements.
    pub evidence: serde_json::Value,
    /// Suggested operator response.
    pub recommendation: String,
    /// Whether the detector blocked the identifier because of this event.
    pub automatic_action_taken: bool,
}

impl ThreatEvent {
    /// A fresh event with a random ID.
    pub fn new(
        threat_type: ThreatType,
        level: ThreatLevel,
        entity: impl Into<String>,
        timestamp: Timestamp,
        description: impl Into<String>,
        evidence: serde_json::Value,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            threat_type,
            level,
            entity: entity.into(),
            description: description.into(),
            evidence,
            recommendation: recommendation.into(),
            automatic_action_taken: false,
        }
    }

    /// Detection time in Unix milliseconds.
    pub fn at_millis(&self) -> i64 {
        self.timestamp.epoch_millis()
    }
}

//! # Behavioral Threat Detection
//!
//! Tracks verification outcomes per identifier and raises [`ThreatEvent`]s
//! when behavior crosses a threshold.
//!
//! ## Lifecycle
//!
//! An identifier is unseen until its first tracked request, then active.
//! Once blocked (by a critical event with `auto_block` on, or by
//! [`ThreatDetector::block`]) every further tracked request is refused with
//! [`ThreatError::Blocked`] before any detector runs, and the refusal is
//! itself recorded as a critical `known_malicious` event. Only
//! [`ThreatDetector::unblock`] leaves the blocked state.
//!
//! ## Reported threats
//!
//! Some signals come from other stages: a replayed nonce, an injection
//! pattern in a field. [`ThreatDetector::record`] attributes such an event
//! to an identifier with the same retention, auto-block and alert handling
//! as detector output.
//!
//! ## Alerts
//!
//! An optional callback receives every event. It is best-effort: an error
//! or panic inside it is logged, counted in
//! [`ThreatStatistics::alert_failures`], and otherwise ignored.

mod detectors;
mod store;
mod types;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aura_core::{BackgroundTask, Clock, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};

pub use detectors::{
    brute_force, credential_stuffing, geographic_anomaly, rapid_requests, BRUTE_FORCE_CRITICAL_RATIO,
    STUFFING_MIN_REQUESTS, STUFFING_MIN_TARGETS,
};
pub use store::{ActivityRecord, ActivityStore, ActivityUpdate, MemoryActivityStore, TargetHit};
pub use types::{ThreatEvent, ThreatLevel, ThreatType};

use crate::error::ThreatError;

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Trailing window for rapid-request and stuffing detection.
    pub rapid_request_window_ms: i64,
    /// Requests per window that count as rapid.
    pub max_requests_per_window: usize,
    /// Cumulative failures that count as brute force.
    pub max_failed_attempts: u64,
    /// In [0, 1]. Higher flags new locations against larger histories.
    pub geo_sensitivity: f64,
    /// How long timestamps and threat events are kept.
    pub retention_ms: i64,
    /// Block an identifier on any critical event.
    pub auto_block: bool,
    /// Background pruning period.
    pub cleanup_interval_ms: u64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            rapid_request_window_ms: 60_000,
            max_requests_per_window: 100,
            max_failed_attempts: 5,
            geo_sensitivity: 0.7,
            retention_ms: 86_400_000,
            auto_block: true,
            cleanup_interval_ms: 300_000,
        }
    }
}

/// One verification outcome to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Who made the request (client, verifier or holder).
    pub identifier: String,
    /// Whether verification succeeded.
    pub success: bool,
    /// Coarse origin, e.g. a country code.
    pub source_location: Option<String>,
    /// What the request targeted, e.g. a holder DID or credential ID.
    pub target_entity: Option<String>,
}

impl TrackRequest {
    /// An outcome with no location or target.
    pub fn new(identifier: impl Into<String>, success: bool) -> Self {
        Self {
            identifier: identifier.into(),
            success,
            source_location: None,
            target_entity: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.source_location = Some(location.into());
        self
    }

    /// Attach a target entity.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_entity = Some(target.into());
        self
    }
}

/// Aggregate view of one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// The identifier.
    pub identifier: String,
    /// Retained request timestamps.
    pub total_requests: usize,
    /// Successful verifications.
    pub successes: u64,
    /// Failed verifications.
    pub failures: u64,
    /// `failures / (successes + failures)`, zero when nothing was tracked.
    pub failure_rate: f64,
    /// Locations seen.
    pub distinct_locations: usize,
    /// Distinct targets among retained hits.
    pub distinct_targets: usize,
    /// Retained threat events.
    pub threat_count: usize,
    /// Most severe retained threat.
    pub highest_level: Option<ThreatLevel>,
    /// Whether the identifier is blocked.
    pub blocked: bool,
    /// First tracked request.
    pub first_seen: Timestamp,
    /// Latest tracked request.
    pub last_seen: Timestamp,
}

/// Detector-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatStatistics {
    /// Identifiers with a record.
    pub tracked_identifiers: usize,
    /// Identifiers on the block list.
    pub blocked_identifiers: usize,
    /// Retained threat events.
    pub total_threats: usize,
    /// Retained events per type.
    pub by_type: BTreeMap<ThreatType, usize>,
    /// Retained events per level.
    pub by_level: BTreeMap<ThreatLevel, usize>,
    /// Alert callback invocations that failed.
    pub alert_failures: u64,
}

/// Error type an alert callback may return.
pub type AlertError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver for every emitted event.
pub type AlertCallback = Arc<dyn Fn(&ThreatEvent) -> Result<(), AlertError> + Send + Sync>;

/// Per-identifier behavioral analysis.
pub struct ThreatDetector {
    config: ThreatConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ActivityStore>,
    alert: Option<AlertCallback>,
    alert_failures: AtomicU64,
}

impl std::fmt::Debug for ThreatDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatDetector")
            .field("config", &self.config)
            .field("alert", &self.alert.is_some())
            .field("alert_failures", &self.alert_failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThreatDetector {
    /// In-memory detector on the system clock.
    pub fn in_memory(config: ThreatConfig) -> Self {
        Self::new(config, Arc::new(MemoryActivityStore::new()), Arc::new(SystemClock))
    }

    /// Detector over an explicit store and clock.
    pub fn new(config: ThreatConfig, store: Arc<dyn ActivityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store,
            alert: None,
            alert_failures: AtomicU64::new(0),
        }
    }

    /// Register the alert callback.
    #[must_use]
    pub fn with_alert(mut self, alert: AlertCallback) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    /// Record one verification outcome and run every detector.
    ///
    /// Returns the events raised by this request.
    ///
    /// # Errors
    ///
    /// [`ThreatError::Blocked`] if the identifier is already blocked,
    /// [`ThreatError::Storage`] if the store fails.
    pub async fn track_verification(&self, request: &TrackRequest) -> Result<Vec<ThreatEvent>, ThreatError> {
        let now = self.clock.now_timestamp();
        let now_ms = now.epoch_millis();
        let id = request.identifier.as_str();

        if self.store.is_blocked(id).await? {
            let event = ThreatEvent::new(
                ThreatType::KnownMalicious,
                ThreatLevel::Critical,
                id,
                now,
                "blocked identifier attempted verification",
                serde_json::json!({ "success": request.success }),
                ThreatType::KnownMalicious.recommendation(),
            );
            let recorded = event.clone();
            self.store
                .update(id, &mut |record| {
                    record.last_seen_ms = now_ms;
                    record.threats.push(recorded.clone());
                })
                .await?;
            self.emit(&event);
            return Err(ThreatError::Blocked {
                identifier: id.to_owned(),
            });
        }

        let config = &self.config;
        let mut raised: Vec<ThreatEvent> = Vec::new();
        self.store
            .update(id, &mut |record| {
                if record.first_seen_ms == 0 {
                    record.first_seen_ms = now_ms;
                }
                record.last_seen_ms = now_ms;
                record.request_timestamps.push(now_ms);
                if request.success {
                    record.successes += 1;
                } else {
                    record.failures += 1;
                }
                if let Some(target) = &request.target_entity {
                    record.targets.push(TargetHit {
                        at_ms: now_ms,
                        target: target.clone(),
                    });
                }

                let location = request.source_location.as_deref();
                let mut events: Vec<ThreatEvent> = [
                    rapid_requests(id, record, config, now),
                    brute_force(id, record, config, now),
                    geographic_anomaly(id, record, location, config, now),
                    credential_stuffing(id, record, config, now),
                ]
                .into_iter()
                .flatten()
                .collect();
                if let Some(location) = location {
                    record.observe_location(location, now_ms);
                }

                for event in &mut events {
                    event.automatic_action_taken = config.auto_block && event.level == ThreatLevel::Critical;
                }
                record.threats.extend(events.iter().cloned());
                raised = events;
            })
            .await?;

        if raised.iter().any(|e| e.automatic_action_taken) && self.store.set_blocked(id, true).await? {
            tracing::warn!(identifier = id, "identifier automatically blocked");
        }
        for event in &raised {
            self.emit(event);
        }
        Ok(raised)
    }

    /// Attribute a threat observed outside the detectors to `identifier`.
    ///
    /// The event is retained on the identifier's record and emitted. A
    /// critical event blocks the identifier when `auto_block` is on.
    ///
    /// # Errors
    ///
    /// [`ThreatError::Storage`] if the store fails.
    pub async fn record(
        &self,
        identifier: &str,
        threat_type: ThreatType,
        level: ThreatLevel,
        description: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Result<ThreatEvent, ThreatError> {
        let now = self.clock.now_timestamp();
        let now_ms = now.epoch_millis();
        let mut event = ThreatEvent::new(
            threat_type,
            level,
            identifier,
            now,
            description,
            evidence,
            threat_type.recommendation(),
        );
        event.automatic_action_taken = self.config.auto_block && level == ThreatLevel::Critical;

        let recorded = event.clone();
        self.store
            .update(identifier, &mut |record| {
                if record.first_seen_ms == 0 {
                    record.first_seen_ms = now_ms;
                }
                record.last_seen_ms = now_ms;
                record.threats.push(recorded.clone());
            })
            .await?;

        if event.automatic_action_taken && self.store.set_blocked(identifier, true).await? {
            tracing::warn!(identifier, "identifier automatically blocked");
        }
        self.emit(&event);
        Ok(event)
    }

    fn emit(&self, event: &ThreatEvent) {
        tracing::warn!(
            identifier = %event.entity,
            threat_type = %event.threat_type,
            level = %event.level,
            automatic_action = event.automatic_action_taken,
            "{}",
            event.description
        );
        let Some(alert) = &self.alert else {
            return;
        };
        let failure = match catch_unwind(AssertUnwindSafe(|| alert(event))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("alert callback panicked".to_owned()),
        };
        if let Some(error) = failure {
            self.alert_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(event_id = %event.id, error = %error, "threat alert delivery failed");
        }
    }

    /// True if `identifier` is blocked.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn is_blocked(&self, identifier: &str) -> Result<bool, ThreatError> {
        Ok(self.store.is_blocked(identifier).await?)
    }

    /// Put `identifier` on the block list.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn block(&self, identifier: &str, reason: &str) -> Result<(), ThreatError> {
        if self.store.set_blocked(identifier, true).await? {
            tracing::warn!(identifier, reason, "identifier blocked");
        }
        Ok(())
    }

    /// Take `identifier` off the block list.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn unblock(&self, identifier: &str) -> Result<(), ThreatError> {
        if self.store.set_blocked(identifier, false).await? {
            tracing::info!(identifier, "identifier unblocked");
        }
        Ok(())
    }

    /// Aggregate view of `identifier`, if it has a record.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn get_activity_summary(&self, identifier: &str) -> Result<Option<ActivitySummary>, ThreatError> {
        let Some(record) = self.store.get(identifier).await? else {
            return Ok(None);
        };
        let blocked = self.store.is_blocked(identifier).await?;
        let total = record.successes + record.failures;
        let failure_rate = if total == 0 {
            0.0
        } else {
            record.failures as f64 / total as f64
        };
        let distinct_targets = record
            .targets
            .iter()
            .map(|h| h.target.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        Ok(Some(ActivitySummary {
            identifier: identifier.to_owned(),
            total_requests: record.request_timestamps.len(),
            successes: record.successes,
            failures: record.failures,
            failure_rate,
            distinct_locations: record.locations.len(),
            distinct_targets,
            threat_count: record.threats.len(),
            highest_level: record.threats.iter().map(|e| e.level).max(),
            blocked,
            first_seen: Timestamp::from_millis(record.first_seen_ms),
            last_seen: Timestamp::from_millis(record.last_seen_ms),
        }))
    }

    /// The most recent `limit` events across all identifiers, newest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn get_recent_threats(&self, limit: usize) -> Result<Vec<ThreatEvent>, ThreatError> {
        let mut events: Vec<ThreatEvent> = self
            .store
            .snapshot()
            .await?
            .into_iter()
            .flat_map(|(_, record)| record.threats)
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }

    /// Detector-wide counters.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn get_statistics(&self) -> Result<ThreatStatistics, ThreatError> {
        let records = self.store.snapshot().await?;
        let mut stats = ThreatStatistics {
            tracked_identifiers: records.len(),
            blocked_identifiers: self.store.blocked().await?.len(),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
            ..ThreatStatistics::default()
        };
        for event in records.iter().flat_map(|(_, r)| &r.threats) {
            stats.total_threats += 1;
            *stats.by_type.entry(event.threat_type).or_default() += 1;
            *stats.by_level.entry(event.level).or_default() += 1;
        }
        Ok(stats)
    }

    /// Discard data older than `retention_ms` and drop records that are
    /// both stale and threat-free. Returns how many records were dropped.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn cleanup(&self) -> Result<usize, ThreatError> {
        let cutoff = self.clock.now_millis().saturating_sub(self.config.retention_ms);
        let dropped = self
            .store
            .prune(&mut |record: &mut ActivityRecord| record.prune_before(cutoff), &|record: &ActivityRecord| {
                record.last_seen_ms >= cutoff || !record.threats.is_empty()
            })
            .await?;
        if dropped > 0 {
            tracing::debug!(dropped, "pruned stale activity records");
        }
        Ok(dropped)
    }

    /// Drop every record and unblock everyone.
    ///
    /// # Errors
    ///
    /// Propagates storage failure.
    pub async fn clear(&self) -> Result<(), ThreatError> {
        Ok(self.store.clear().await?)
    }

    /// Run [`cleanup`](Self::cleanup) periodically until the handle is
    /// stopped or dropped.
    pub fn start_cleanup(self: &Arc<Self>) -> BackgroundTask {
        let this = Arc::clone(self);
        BackgroundTask::spawn_periodic(
            "threat-cleanup",
            Duration::from_millis(self.config.cleanup_interval_ms),
            move || {
                let this = Arc::clone(&this);
                async move {
                    if let Err(e) = this.cleanup().await {
                        tracing::warn!(error = %e, "threat cleanup failed");
                    }
                }
            },
        )
    }
}

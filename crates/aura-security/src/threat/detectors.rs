//! Behavioral detectors.
//!
//! Each detector inspects one identifier's record after the current request
//! has been counted and returns at most one event. They share no state and
//! may run in any order, with one exception: the geographic detector must
//! see the location history *before* the current location is added.

use aura_core::Timestamp;
use serde_json::json;

use super::store::ActivityRecord;
use super::types::{ThreatEvent, ThreatLevel, ThreatType};
use super::ThreatConfig;

/// Requests in the window above which stuffing is considered.
pub const STUFFING_MIN_REQUESTS: usize = 10;

/// Distinct targets in the window above which stuffing is reported.
pub const STUFFING_MIN_TARGETS: usize = 5;

/// Failure ratio above which brute force escalates to critical.
pub const BRUTE_FORCE_CRITICAL_RATIO: f64 = 0.8;

/// Request volume at or above `max_requests_per_window`.
pub fn rapid_requests(
    entity: &str,
    record: &ActivityRecord,
    config: &ThreatConfig,
    now: Timestamp,
) -> Option<ThreatEvent> {
    let now_ms = now.epoch_millis();
    let count = record.requests_in_window(now_ms, config.rapid_request_window_ms);
    if count < config.max_requests_per_window {
        return None;
    }
    let window_secs = (config.rapid_request_window_ms as f64 / 1000.0).max(f64::MIN_POSITIVE);
    let rps = count as f64 / window_secs;
    Some(ThreatEvent::new(
        ThreatType::RapidRequests,
        ThreatLevel::High,
        entity,
        now,
        format!("{count} requests within {} ms", config.rapid_request_window_ms),
        json!({
            "request_count": count,
            "window_ms": config.rapid_request_window_ms,
            "requests_per_second": format!("{rps:.2}"),
        }),
        ThreatType::RapidRequests.recommendation(),
    ))
}

/// Cumulative failures at or above `max_failed_attempts`.
pub fn brute_force(
    entity: &str,
    record: &ActivityRecord,
    config: &ThreatConfig,
    now: Timestamp,
) -> Option<ThreatEvent> {
    if record.failures < config.max_failed_attempts {
        return None;
    }
    let total = record.failures + record.successes;
    let ratio = record.failures as f64 / total.max(1) as f64;
    let level = if ratio > BRUTE_FORCE_CRITICAL_RATIO {
        ThreatLevel::Critical
    } else {
        ThreatLevel::High
    };
    Some(ThreatEvent::new(
        ThreatType::BruteForce,
        level,
        entity,
        now,
        format!("{} failed verifications out of {total}", record.failures),
        json!({
            "failures": record.failures,
            "successes": record.successes,
            "failure_ratio": format!("{ratio:.2}"),
        }),
        ThreatType::BruteForce.recommendation(),
    ))
}

/// A location absent from a small history.
///
/// The new location's share of the history after adding it is
/// `1 / (known + 1)`. An event is raised when that share is at least
/// `1 - geo_sensitivity`. The first location ever seen is never anomalous.
pub fn geographic_anomaly(
    entity: &str,
    record: &ActivityRecord,
    location: Option<&str>,
    config: &ThreatConfig,
    now: Timestamp,
) -> Option<ThreatEvent> {
    let location = location?;
    let known = record.locations.len();
    if known == 0 || record.locations.contains_key(location) {
        return None;
    }
    let share = 1.0 / (known as f64 + 1.0);
    if share < 1.0 - config.geo_sensitivity {
        return None;
    }
    Some(ThreatEvent::new(
        ThreatType::GeographicAnomaly,
        ThreatLevel::Medium,
        entity,
        now,
        format!("request from new location {location:?}"),
        json!({
            "location": location,
            "known_locations": record.locations.keys().collect::<Vec<_>>(),
        }),
        ThreatType::GeographicAnomaly.recommendation(),
    ))
}

/// Many requests spread over many targets within the rapid-request window.
pub fn credential_stuffing(
    entity: &str,
    record: &ActivityRecord,
    config: &ThreatConfig,
    now: Timestamp,
) -> Option<ThreatEvent> {
    let now_ms = now.epoch_millis();
    let requests = record.requests_in_window(now_ms, config.rapid_request_window_ms);
    if requests <= STUFFING_MIN_REQUESTS {
        return None;
    }
    let targets = record.distinct_targets_in_window(now_ms, config.rapid_request_window_ms);
    if targets <= STUFFING_MIN_TARGETS {
        return None;
    }
    Some(ThreatEvent::new(
        ThreatType::CredentialStuffing,
        ThreatLevel::High,
        entity,
        now,
        format!("{requests} requests across {targets} targets"),
        json!({
            "request_count": requests,
            "distinct_targets": targets,
            "window_ms": config.rapid_request_window_ms,
        }),
        ThreatType::CredentialStuffing.recommendation(),
    ))
}

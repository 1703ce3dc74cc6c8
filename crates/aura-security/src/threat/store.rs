//! Per-identifier activity storage.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::types::ThreatEvent;
use crate::error::StorageError;

/// Most locations remembered per identifier. The least recently seen is
/// forgotten first.
pub const MAX_TRACKED_LOCATIONS: usize = 64;

/// A target entity touched at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHit {
    /// When, in Unix milliseconds.
    pub at_ms: i64,
    /// The target entity.
    pub target: String,
}

/// Everything the detector remembers about one identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Request times in Unix milliseconds, oldest first.
    pub request_timestamps: Vec<i64>,
    /// Successful verifications seen.
    pub successes: u64,
    /// Failed verifications seen.
    pub failures: u64,
    /// Target entities touched, oldest first.
    pub targets: Vec<TargetHit>,
    /// Locations the identifier has been seen from, with the last time each
    /// was seen (Unix milliseconds).
    pub locations: BTreeMap<String, i64>,
    /// Threats attributed to the identifier, oldest first.
    pub threats: Vec<ThreatEvent>,
    /// First tracked request.
    pub first_seen_ms: i64,
    /// Latest tracked request.
    pub last_seen_ms: i64,
}

impl ActivityRecord {
    /// Requests within the half-open window `(now - window_ms, now]`.
    pub fn requests_in_window(&self, now_ms: i64, window_ms: i64) -> usize {
        let since = now_ms.saturating_sub(window_ms);
        self.request_timestamps
            .iter()
            .filter(|&&t| t > since && t <= now_ms)
            .count()
    }

    /// Distinct targets within the same window.
    pub fn distinct_targets_in_window(&self, now_ms: i64, window_ms: i64) -> usize {
        let since = now_ms.saturating_sub(window_ms);
        self.targets
            .iter()
            .filter(|h| h.at_ms > since && h.at_ms <= now_ms)
            .map(|h| h.target.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Note a request from `location`, evicting the stalest location when
    /// the history is full.
    pub fn observe_location(&mut self, location: &str, now_ms: i64) {
        if let Some(seen) = self.locations.get_mut(location) {
            *seen = (*seen).max(now_ms);
            return;
        }
        if self.locations.len() >= MAX_TRACKED_LOCATIONS {
            let stalest = self
                .locations
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(name, _)| name.clone());
            if let Some(stalest) = stalest {
                self.locations.remove(&stalest);
            }
        }
        self.locations.insert(location.to_owned(), now_ms);
    }

    /// Discard timestamps, targets, locations and threats older than
    /// `cutoff_ms`.
    pub fn prune_before(&mut self, cutoff_ms: i64) {
        self.request_timestamps.retain(|&t| t >= cutoff_ms);
        self.targets.retain(|h| h.at_ms >= cutoff_ms);
        self.locations.retain(|_, seen| *seen >= cutoff_ms);
        self.threats.retain(|e| e.at_millis() >= cutoff_ms);
    }
}

/// In-place edit of one identifier's record.
pub type ActivityUpdate<'a> = &'a mut (dyn FnMut(&mut ActivityRecord) + Send);

/// Storage for activity records and the block list.
///
/// [`update`](ActivityStore::update) must run the edit atomically per
/// identifier.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Apply `update` to `identifier`'s record, creating an empty one first
    /// if absent.
    async fn update(&self, identifier: &str, update: ActivityUpdate<'_>) -> Result<(), StorageError>;

    /// A copy of `identifier`'s record.
    async fn get(&self, identifier: &str) -> Result<Option<ActivityRecord>, StorageError>;

    /// Copies of every record.
    async fn snapshot(&self) -> Result<Vec<(String, ActivityRecord)>, StorageError>;

    /// Apply `update` to every record, then drop those for which `keep`
    /// returns false. Returns how many were dropped.
    async fn prune(
        &self,
        update: ActivityUpdate<'_>,
        keep: &(dyn for<'r> Fn(&'r ActivityRecord) -> bool + Send + Sync),
    ) -> Result<usize, StorageError>;

    /// True if `identifier` is blocked.
    async fn is_blocked(&self, identifier: &str) -> Result<bool, StorageError>;

    /// Add or remove `identifier` from the block list. Returns whether the
    /// list changed.
    async fn set_blocked(&self, identifier: &str, blocked: bool) -> Result<bool, StorageError>;

    /// Every blocked identifier.
    async fn blocked(&self) -> Result<Vec<String>, StorageError>;

    /// Drop all records and unblock everyone.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// In-process activity store.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    records: RwLock<HashMap<String, ActivityRecord>>,
    blocked: RwLock<HashSet<String>>,
}

impl MemoryActivityStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn update(&self, identifier: &str, update: ActivityUpdate<'_>) -> Result<(), StorageError> {
        let mut records = self.records.write();
        update(records.entry(identifier.to_owned()).or_default());
        Ok(())
    }

    async fn get(&self, identifier: &str) -> Result<Option<ActivityRecord>, StorageError> {
        Ok(self.records.read().get(identifier).cloned())
    }

    async fn snapshot(&self) -> Result<Vec<(String, ActivityRecord)>, StorageError> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn prune(
        &self,
        update: ActivityUpdate<'_>,
        keep: &(dyn for<'r> Fn(&'r ActivityRecord) -> bool + Send + Sync),
    ) -> Result<usize, StorageError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| {
            update(record);
            keep(record)
        });
        Ok(before - records.len())
    }

    async fn is_blocked(&self, identifier: &str) -> Result<bool, StorageError> {
        Ok(self.blocked.read().contains(identifier))
    }

    async fn set_blocked(&self, identifier: &str, blocked: bool) -> Result<bool, StorageError> {
        let mut set = self.blocked.write();
        Ok(if blocked {
            set.insert(identifier.to_owned())
        } else {
            set.remove(identifier)
        })
    }

    async fn blocked(&self) -> Result<Vec<String>, StorageError> {
        let mut list: Vec<String> = self.blocked.read().iter().cloned().collect();
        list.sort();
        Ok(list)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.records.write().clear();
        self.blocked.write().clear();
        Ok(())
    }
}

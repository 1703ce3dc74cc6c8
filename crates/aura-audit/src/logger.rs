//! Buffered, hash-chained audit logger.

use std::sync::Arc;
use std::time::Duration;

use aura_core::{BackgroundTask, Clock, SystemClock, Timestamp, GENESIS_HASH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::entry::{AuditCategory, AuditEntry, AuditEvent, AuditOutcome, AuditSeverity};
use crate::error::AuditError;
use crate::integrity::verify_integrity;
use crate::redact::{Redactor, DEFAULT_SENSITIVE_KEYS};
use crate::store::{AuditStore, MemoryAuditStore};

/// Buffering and redaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries held before an automatic flush.
    pub buffer_size: usize,
    /// Period of the background flush task.
    pub flush_interval_ms: u64,
    /// Metadata keys replaced with the redaction marker, case-insensitive.
    pub sensitive_keys: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval_ms: 5_000,
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| (*k).to_owned()).collect(),
        }
    }
}

/// Entries to select. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    /// Only this category.
    pub category: Option<AuditCategory>,
    /// Only this outcome.
    pub outcome: Option<AuditOutcome>,
    /// Only this actor.
    pub actor: Option<String>,
    /// At or after this time.
    pub from: Option<Timestamp>,
    /// At or before this time.
    pub to: Option<Timestamp>,
    /// At most this many, keeping the newest.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// True if `entry` satisfies every set criterion except `limit`.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.category.map_or(true, |c| c == entry.category)
            && self.outcome.map_or(true, |o| o == entry.outcome)
            && self.actor.as_deref().map_or(true, |a| entry.actor.as_deref() == Some(a))
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }

    /// Apply the filter to `entries`, in order.
    pub fn apply(&self, entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
        let mut selected: Vec<AuditEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(limit) = self.limit {
            let skip = selected.len().saturating_sub(limit);
            selected.drain(..skip);
        }
        selected
    }
}

/// A verification to record with [`AuditLogger::log_verification_attempt`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationAttempt {
    /// The presentation ID, if parsing got that far.
    pub presentation_id: Option<String>,
    /// The holder DID, if parsing got that far.
    pub holder_did: Option<String>,
    /// Who asked for the verification.
    pub verifier_id: Option<String>,
    /// Whether verification succeeded.
    pub success: bool,
    /// Why it failed.
    pub reason: Option<String>,
    /// Wall time spent.
    pub duration_ms: u64,
    /// Extra detail. Redacted like any other metadata.
    pub metadata: Value,
}

#[derive(Debug)]
struct ChainState {
    next_sequence: u64,
    last_hash: String,
    buffer: Vec<AuditEntry>,
}

/// Appends chained entries, buffers them and commits them to a store.
///
/// Sequence assignment, hashing and buffering happen under one async lock,
/// so concurrent callers always produce a contiguous chain.
pub struct AuditLogger {
    config: AuditConfig,
    redactor: Redactor,
    clock: Arc<dyn Clock>,
    store: Arc<dyn AuditStore>,
    state: Mutex<ChainState>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// In-memory logger on the system clock.
    pub fn in_memory(config: AuditConfig) -> Self {
        Self::fresh(config, Arc::new(MemoryAuditStore::new()), Arc::new(SystemClock))
    }

    /// Logger over `store`, continuing the chain already in it.
    ///
    /// # Errors
    ///
    /// Propagates failure to read the store's last entry.
    pub async fn open(config: AuditConfig, store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let (next_sequence, last_hash) = match store.last().await? {
            Some(last) => (last.sequence + 1, last.hash),
            None => (0, GENESIS_HASH.to_owned()),
        };
        if next_sequence > 0 {
            tracing::debug!(next_sequence, "resuming audit chain");
        }
        let mut logger = Self::fresh(config, store, clock);
        let state = logger.state.get_mut();
        state.next_sequence = next_sequence;
        state.last_hash = last_hash;
        Ok(logger)
    }

    fn fresh(config: AuditConfig, store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            redactor: Redactor::new(&config.sensitive_keys),
            config,
            clock,
            store,
            state: Mutex::new(ChainState {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_owned(),
                buffer: Vec::new(),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Append `event` to the chain and buffer it.
    ///
    /// When the buffer reaches `buffer_size` it is flushed. A failed flush
    /// keeps the entries buffered for the next attempt and is logged, not
    /// returned.
    ///
    /// # Errors
    ///
    /// [`AuditError::Canonicalization`] if the event cannot be hashed. The
    /// chain is unchanged in that case.
    pub async fn log(&self, mut event: AuditEvent) -> Result<AuditEntry, AuditError> {
        self.redactor.redact_map(&mut event.metadata);
        let mut state = self.state.lock().await;
        let entry = AuditEntry::seal(
            event,
            state.next_sequence,
            self.clock.now_timestamp(),
            state.last_hash.clone(),
        )?;
        state.next_sequence += 1;
        state.last_hash = entry.hash.clone();
        state.buffer.push(entry.clone());

        if state.buffer.len() >= self.config.buffer_size.max(1) {
            if let Err(e) = self.commit(&mut state).await {
                tracing::warn!(error = %e, pending = state.buffer.len(), "audit flush failed; entries kept for retry");
            }
        }
        Ok(entry)
    }

    async fn commit(&self, state: &mut ChainState) -> Result<usize, AuditError> {
        if state.buffer.is_empty() {
            return Ok(0);
        }
        self.store.append(&state.buffer).await?;
        let written = state.buffer.len();
        state.buffer.clear();
        Ok(written)
    }

    /// Commit every buffered entry now. Returns how many were written.
    ///
    /// Call before shutdown; buffered entries are otherwise lost.
    ///
    /// # Errors
    ///
    /// Propagates store failure. The entries stay buffered.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        let mut state = self.state.lock().await;
        self.commit(&mut state).await
    }

    /// Entries appended but not yet committed.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Flush, then return stored entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates store failure.
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.flush().await?;
        Ok(filter.apply(self.store.load_all().await?))
    }

    /// Flush, then verify the whole stored chain.
    ///
    /// # Errors
    ///
    /// Propagates store failure.
    pub async fn verify_integrity(&self) -> Result<bool, AuditError> {
        self.flush().await?;
        Ok(verify_integrity(&self.store.load_all().await?))
    }

    /// Record a presentation verification.
    ///
    /// # Errors
    ///
    /// As [`log`](Self::log).
    pub async fn log_verification_attempt(&self, attempt: &VerificationAttempt) -> Result<AuditEntry, AuditError> {
        let (outcome, severity, message) = if attempt.success {
            (AuditOutcome::Success, AuditSeverity::Info, "presentation verified".to_owned())
        } else {
            let reason = attempt.reason.as_deref().unwrap_or("unspecified");
            (
                AuditOutcome::Failure,
                AuditSeverity::Warning,
                format!("presentation rejected: {reason}"),
            )
        };
        let mut event = AuditEvent::new(AuditCategory::Verification, "verify_presentation", outcome, message)
            .severity(severity)
            .meta("duration_ms", attempt.duration_ms)
            .with_metadata(attempt.metadata.clone());
        if let Some(verifier) = &attempt.verifier_id {
            event = event.actor(verifier.clone());
        }
        if let Some(holder) = &attempt.holder_did {
            event = event.target(holder.clone());
        }
        if let Some(id) = &attempt.presentation_id {
            event = event.meta("presentation_id", id.clone());
        }
        if let Some(reason) = &attempt.reason {
            event = event.meta("reason", reason.clone());
        }
        self.log(event).await
    }

    /// Record a security decision.
    ///
    /// # Errors
    ///
    /// As [`log`](Self::log).
    pub async fn log_security_event(
        &self,
        action: &str,
        severity: AuditSeverity,
        actor: Option<&str>,
        message: &str,
        metadata: Value,
    ) -> Result<AuditEntry, AuditError> {
        let outcome = if severity >= AuditSeverity::Error {
            AuditOutcome::Blocked
        } else {
            AuditOutcome::Failure
        };
        let mut event = AuditEvent::new(AuditCategory::Security, action, outcome, message)
            .severity(severity)
            .with_metadata(metadata);
        if let Some(actor) = actor {
            event = event.actor(actor);
        }
        self.log(event).await
    }

    /// Flush every `flush_interval_ms` until the handle is stopped or
    /// dropped. Failures are logged and retried on the next tick.
    pub fn start_flush_task(self: &Arc<Self>) -> BackgroundTask {
        let this = Arc::clone(self);
        BackgroundTask::spawn_periodic(
            "audit-flush",
            Duration::from_millis(self.config.flush_interval_ms),
            move || {
                let this = Arc::clone(&this);
                async move {
                    match this.flush().await {
                        Ok(0) => {}
                        Ok(written) => tracing::debug!(written, "audit buffer flushed"),
                        Err(e) => tracing::warn!(error = %e, "periodic audit flush failed"),
                    }
                }
            },
        )
    }
}

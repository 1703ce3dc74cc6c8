//! # Verification Pipeline
//!
//! One presentation flows through the stages in order, stopping at the first
//! failure:
//!
//! ```text
//! parse → validate (+ nonce) → rate limit → block check
//!       → DID resolution → signature → credential status
//! ```
//!
//! Whatever the outcome, the attempt is then fed to the threat detector and
//! written to the audit trail. A verification whose audit entry cannot be
//! sealed is reported as failed. A rejected nonce is reported as a replay
//! attack, and an injection pattern in the presentation ID as a suspicious
//! pattern.
//!
//! ## Identities
//!
//! Rate limiting and the block check run before the signature and use the
//! context's `client_id`, falling back to the holder DID.
//!
//! Threat signals are charged to the `client_id` too. Without one, the
//! holder DID is charged only once its signature has verified. Anyone can
//! name a DID in a forged code, so unauthenticated attempts are tracked as
//! `unverified:<did>` and cannot get the genuine holder blocked. Input that
//! did not parse is tracked as [`ANONYMOUS_CALLER`].

use std::sync::Arc;

use aura_audit::{AuditLogger, AuditSeverity, AuditStore, JsonLinesAuditStore, MemoryAuditStore, VerificationAttempt};
use aura_core::sanitize::detect_injection;
use aura_core::{BackgroundTask, Clock, InjectionKind, SystemClock, Timestamp};
use aura_qr::{DisclosureContext, QrParser, QrPresentation, QrValidationError, QrValidator, ValidationIssue};
use aura_security::{
    AlertCallback, BloomNonceStore, CompositeRateLimiter, MemoryActivityStore, MemoryRateLimitStore, NonceManager,
    PresentationNonceAdapter, RateLimiter, ThreatDetector, ThreatError, ThreatEvent, ThreatLevel, ThreatType,
    TierScope, TrackRequest,
};
use serde::{Deserialize, Serialize};

use crate::collaborators::{CredentialStatus, CredentialStatusProvider, DidResolver};
use crate::config::{NonceBackend, VerifierConfig};
use crate::error::{BuildError, VerificationError};
use crate::signature::{verify_presentation_signature, DefaultSignatureVerifier, SignatureVerifier};

/// Threat and rate-limit identity for input that never parsed.
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Prefix of the threat identity for a holder DID whose signature has not
/// verified.
pub const UNVERIFIED_PREFIX: &str = "unverified:";

/// Who is asking, as far as the transport knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationContext {
    /// Stable caller identity (API key id, device id, IP).
    pub client_id: Option<String>,
    /// Coarse origin, e.g. a country code.
    pub source_location: Option<String>,
}

impl VerificationContext {
    /// Context with no caller information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client identity.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.source_location = Some(location.into());
        self
    }
}

/// Status of one referenced credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub credential_id: String,
    /// `None` if the status provider does not know the credential.
    pub status: Option<CredentialStatus>,
    /// True iff the status is active.
    pub verified: bool,
}

/// Result of a presentation that passed every stage up to credential status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub presentation_id: String,
    pub holder_did: String,
    /// True iff every referenced credential is active.
    pub verified: bool,
    /// The DID document key that verified the signature.
    pub key_id: String,
    pub credentials: Vec<CredentialCheck>,
    /// Disclosure flags as presented.
    pub disclosed: DisclosureContext,
    /// Non-blocking validation findings.
    pub warnings: Vec<ValidationIssue>,
    /// Threat events raised while tracking this attempt.
    pub threats: Vec<ThreatEvent>,
    pub verified_at: Timestamp,
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Credentials that are not active, with their status.
    pub fn unverified_credentials(&self) -> impl Iterator<Item = &CredentialCheck> {
        self.credentials.iter().filter(|c| !c.verified)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Verifier`] from configuration and collaborators.
pub struct VerifierBuilder {
    config: VerifierConfig,
    resolver: Arc<dyn DidResolver>,
    status: Arc<dyn CredentialStatusProvider>,
    signatures: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
    audit_store: Option<Arc<dyn AuditStore>>,
    alert: Option<AlertCallback>,
}

impl std::fmt::Debug for VerifierBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierBuilder")
            .field("config", &self.config)
            .field("signatures", &self.signatures)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl VerifierBuilder {
    /// Builder with the default signature verifier and the system clock.
    pub fn new(
        config: VerifierConfig,
        resolver: Arc<dyn DidResolver>,
        status: Arc<dyn CredentialStatusProvider>,
    ) -> Self {
        Self {
            config,
            resolver,
            status,
            signatures: Arc::new(DefaultSignatureVerifier),
            clock: Arc::new(SystemClock),
            audit_store: None,
            alert: None,
        }
    }

    /// Replace the signature verifier.
    #[must_use]
    pub fn signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.signatures = verifier;
        self
    }

    /// Replace the clock shared by every component.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Write the audit trail to `store` instead of the configured default.
    #[must_use]
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Callback invoked for every threat event.
    #[must_use]
    pub fn alert(mut self, alert: AlertCallback) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Validate the configuration and wire the components.
    ///
    /// # Errors
    ///
    /// [`BuildError::Config`] for invalid configuration,
    /// [`BuildError::Audit`] if the audit store cannot be read.
    pub async fn build(self) -> Result<Verifier, BuildError> {
        let Self {
            config,
            resolver,
            status,
            signatures,
            clock,
            audit_store,
            alert,
        } = self;
        config.validate()?;

        let nonces = Arc::new(match &config.nonce_backend {
            NonceBackend::Memory => NonceManager::new(
                config.nonce.clone(),
                Arc::new(aura_security::MemoryNonceStore::new()),
                Arc::clone(&clock),
            ),
            NonceBackend::Bloom {
                expected_items,
                false_positive_rate,
                retention_ms,
            } => {
                let floor = config.nonce.retention_ms();
                let retention = retention_ms.map_or(floor, |ms| ms.max(floor));
                NonceManager::new(
                    config.nonce.clone(),
                    Arc::new(BloomNonceStore::for_retention(
                        *expected_items,
                        *false_positive_rate,
                        retention,
                    )),
                    Arc::clone(&clock),
                )
            }
        });

        let per_caller = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            config.jitter.clone(),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::clone(&clock),
        ));
        let mut limiters = vec![Arc::clone(&per_caller)];
        let mut limiter = CompositeRateLimiter::new().with_tier("caller", TierScope::PerIdentifier, per_caller);
        if let Some(global) = &config.global_rate_limit {
            let global = Arc::new(RateLimiter::new(
                global.clone(),
                config.jitter.clone(),
                Arc::new(MemoryRateLimitStore::new()),
                Arc::clone(&clock),
            ));
            limiters.push(Arc::clone(&global));
            limiter = limiter.with_tier("global", TierScope::Global, global);
        }

        let mut threats = ThreatDetector::new(
            config.threat.clone(),
            Arc::new(MemoryActivityStore::new()),
            Arc::clone(&clock),
        );
        if let Some(alert) = alert {
            threats = threats.with_alert(alert);
        }

        let audit_store = match (audit_store, &config.audit_log_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonLinesAuditStore::new(path)) as Arc<dyn AuditStore>,
            (None, None) => Arc::new(MemoryAuditStore::new()) as Arc<dyn AuditStore>,
        };
        let audit = AuditLogger::open(config.audit.clone(), audit_store, Arc::clone(&clock)).await?;

        tracing::info!(
            verifier_id = %config.verifier_id,
            rate_limit_tiers = limiters.len(),
            "verifier ready"
        );

        Ok(Verifier {
            parser: QrParser::with_clock(config.parse.clone(), Arc::clone(&clock)),
            validator: QrValidator::with_clock(config.validation.clone(), Arc::clone(&clock)),
            nonce_adapter: PresentationNonceAdapter::new(Arc::clone(&nonces))
                .with_expiry_grace_ms(config.validation.expiration_tolerance_secs.saturating_mul(1000)),
            nonces,
            limiter,
            limiters,
            threats: Arc::new(threats),
            audit: Arc::new(audit),
            resolver,
            status,
            signatures,
            clock,
            config,
        })
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// The verification gate.
pub struct Verifier {
    pub(crate) config: VerifierConfig,
    clock: Arc<dyn Clock>,
    parser: QrParser,
    validator: QrValidator,
    nonces: Arc<NonceManager>,
    nonce_adapter: PresentationNonceAdapter,
    limiter: CompositeRateLimiter,
    limiters: Vec<Arc<RateLimiter>>,
    threats: Arc<ThreatDetector>,
    audit: Arc<AuditLogger>,
    resolver: Arc<dyn DidResolver>,
    status: Arc<dyn CredentialStatusProvider>,
    signatures: Arc<dyn SignatureVerifier>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("verifier_id", &self.config.verifier_id)
            .field("nonces", &self.nonces)
            .field("threats", &self.threats)
            .finish_non_exhaustive()
    }
}

/// What the pipeline learned before it stopped.
#[derive(Default)]
struct Progress {
    presentation_id: Option<String>,
    holder_did: Option<String>,
    nonce_key: Option<String>,
    injection: Option<InjectionKind>,
    /// The holder's signature verified.
    authenticated: bool,
}

impl Verifier {
    /// Start a builder.
    pub fn builder(
        config: VerifierConfig,
        resolver: Arc<dyn DidResolver>,
        status: Arc<dyn CredentialStatusProvider>,
    ) -> VerifierBuilder {
        VerifierBuilder::new(config, resolver, status)
    }

    /// Active configuration.
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// The replay guard.
    pub fn nonce_manager(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// The threat detector, for block list management and statistics.
    pub fn threat_detector(&self) -> &Arc<ThreatDetector> {
        &self.threats
    }

    /// The audit trail.
    pub fn audit_logger(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Forget rate-limit state for `identifier`.
    ///
    /// # Errors
    ///
    /// Propagates limiter storage failure.
    pub async fn reset_rate_limit(&self, identifier: &str) -> Result<(), VerificationError> {
        Ok(self.limiter.reset(identifier).await?)
    }

    /// Start every periodic cleanup and flush loop. The loops stop when the
    /// returned handles are dropped.
    pub fn start_background_tasks(&self) -> Vec<BackgroundTask> {
        let mut tasks = vec![self.nonces.start_cleanup(), self.threats.start_cleanup()];
        tasks.extend(self.limiters.iter().map(RateLimiter::start_cleanup));
        tasks.push(self.audit.start_flush_task());
        tasks
    }

    /// Flush buffered audit entries.
    ///
    /// # Errors
    ///
    /// Propagates audit store failure; the entries stay buffered.
    pub async fn shutdown(&self) -> Result<(), VerificationError> {
        let written = self.audit.flush().await?;
        tracing::info!(written, "verifier shut down");
        Ok(())
    }

    /// Run `raw` through the full pipeline.
    ///
    /// # Errors
    ///
    /// [`VerificationError`] naming the first stage that rejected the
    /// presentation. A report with `verified == false` is not an error: the
    /// presentation is authentic but references an inactive credential.
    pub async fn verify(&self, raw: &str, ctx: &VerificationContext) -> Result<VerificationReport, VerificationError> {
        let started = tokio::time::Instant::now();
        let mut progress = Progress::default();
        let mut outcome = self.run(raw, ctx, &mut progress).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let caller = tracked_identity(ctx, &progress);
        let success = matches!(&outcome, Ok(report) if report.verified);
        let mut threats = self.track(&caller, success, ctx, progress.holder_did.as_deref()).await;
        threats.extend(self.report_signals(&caller, &progress, &outcome).await);

        if let Ok(report) = &mut outcome {
            report.threats = threats;
            report.duration_ms = duration_ms;
        }

        let attempt = VerificationAttempt {
            presentation_id: progress.presentation_id,
            holder_did: progress.holder_did,
            verifier_id: Some(self.config.verifier_id.clone()),
            success,
            reason: failure_reason(&outcome),
            duration_ms,
            metadata: attempt_metadata(&caller, &outcome),
        };
        if let Err(e) = self.audit.log_verification_attempt(&attempt).await {
            tracing::error!(error = %e, "verification attempt could not be audited");
            if outcome.is_ok() {
                return Err(e.into());
            }
        }

        match &outcome {
            Ok(report) => tracing::info!(
                presentation_id = %report.presentation_id,
                verified = report.verified,
                duration_ms,
                "presentation checked"
            ),
            Err(e) => tracing::info!(stage = %e.stage(), error = %e, duration_ms, "presentation rejected"),
        }
        outcome
    }

    async fn run(
        &self,
        raw: &str,
        ctx: &VerificationContext,
        progress: &mut Progress,
    ) -> Result<VerificationReport, VerificationError> {
        let presentation = self.parser.parse(raw)?;
        progress.presentation_id = Some(presentation.presentation_id.clone());
        progress.holder_did = Some(presentation.holder_did.clone());
        progress.nonce_key = Some(PresentationNonceAdapter::key_for(&presentation));
        progress.injection = detect_injection(&presentation.presentation_id);

        let validation = self
            .validator
            .validate_async_strict(&presentation, Some(&self.nonce_adapter))
            .await?;

        let caller = caller_identity(ctx, Some(&presentation.holder_did));
        self.limiter.check_limit(&caller, 1).await?;

        if self.threats.is_blocked(&caller).await? {
            return Err(ThreatError::Blocked { identifier: caller }.into());
        }

        let key_id = self.check_signature(&presentation).await?;
        progress.authenticated = true;
        let credentials = self.check_credentials(&presentation).await?;

        Ok(VerificationReport {
            verified: credentials.iter().all(|c| c.verified),
            presentation_id: presentation.presentation_id,
            holder_did: presentation.holder_did,
            key_id,
            credentials,
            disclosed: presentation.context,
            warnings: validation.warnings,
            threats: Vec::new(),
            verified_at: self.clock.now_timestamp(),
            duration_ms: 0,
        })
    }

    /// Resolve the holder and return the id of the first key that verifies.
    async fn check_signature(&self, p: &QrPresentation) -> Result<String, VerificationError> {
        let did = &p.holder_did;
        let document = self
            .resolver
            .resolve(did)
            .await
            .map_err(|e| VerificationError::DidResolution {
                did: did.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| VerificationError::DidResolution {
                did: did.clone(),
                reason: "DID not found".to_string(),
            })?;
        if document.verification_methods.is_empty() {
            return Err(VerificationError::DidResolution {
                did: did.clone(),
                reason: "document has no verification keys".to_string(),
            });
        }

        let mut last_error = None;
        let mut any_checked = false;
        for method in &document.verification_methods {
            match verify_presentation_signature(self.signatures.as_ref(), p, &method.public_key_hex) {
                Ok(true) => return Ok(method.id.clone()),
                Ok(false) => any_checked = true,
                Err(e) => {
                    tracing::debug!(key_id = %method.id, error = %e, "key not usable for signature check");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !any_checked => Err(e.into()),
            _ => Err(VerificationError::SignatureInvalid { did: did.clone() }),
        }
    }

    async fn check_credentials(&self, p: &QrPresentation) -> Result<Vec<CredentialCheck>, VerificationError> {
        let mut checks = Vec::with_capacity(p.credential_ids.len());
        for id in &p.credential_ids {
            let status = self.status.status(id).await?;
            checks.push(CredentialCheck {
                credential_id: id.clone(),
                status,
                verified: status.is_some_and(CredentialStatus::is_active),
            });
        }
        Ok(checks)
    }

    /// Feed the outcome to the threat detector and audit any events.
    async fn track(
        &self,
        caller: &str,
        success: bool,
        ctx: &VerificationContext,
        holder_did: Option<&str>,
    ) -> Vec<ThreatEvent> {
        let mut request = TrackRequest::new(caller, success);
        if let Some(location) = &ctx.source_location {
            request = request.with_location(location.clone());
        }
        if let Some(holder) = holder_did {
            request = request.with_target(holder);
        }
        let events = match self.threats.track_verification(&request).await {
            Ok(events) => events,
            Err(ThreatError::Blocked { identifier }) => {
                tracing::debug!(identifier = %identifier, "attempt by blocked caller tracked");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(identifier = %caller, error = %e, "threat tracking failed");
                return Vec::new();
            }
        };
        for event in &events {
            self.audit_threat(caller, event).await;
        }
        events
    }

    /// Record threats that other stages revealed: a rejected nonce and an
    /// injection pattern in the presentation ID.
    async fn report_signals(
        &self,
        caller: &str,
        progress: &Progress,
        outcome: &Result<VerificationReport, VerificationError>,
    ) -> Vec<ThreatEvent> {
        let mut signals = Vec::new();
        if let Err(VerificationError::Validation(QrValidationError::Nonce { nonce })) = outcome {
            let replayed = match &progress.nonce_key {
                Some(key) => self.nonces.has_been_used(key).await.unwrap_or(false),
                None => false,
            };
            if replayed {
                signals.push((
                    ThreatType::ReplayAttack,
                    ThreatLevel::High,
                    "presentation nonce was already used".to_string(),
                    serde_json::json!({
                        "presentation_id": progress.presentation_id,
                        "nonce": nonce,
                    }),
                ));
            }
        }
        if let Some(kind) = progress.injection {
            signals.push((
                ThreatType::SuspiciousPattern,
                ThreatLevel::Medium,
                format!("presentation ID contains a suspicious {kind} pattern"),
                serde_json::json!({
                    "presentation_id": progress.presentation_id,
                    "pattern": kind.to_string(),
                }),
            ));
        }

        let mut events = Vec::with_capacity(signals.len());
        for (threat_type, level, description, evidence) in signals {
            match self.threats.record(caller, threat_type, level, description, evidence).await {
                Ok(event) => {
                    self.audit_threat(caller, &event).await;
                    events.push(event);
                }
                Err(e) => tracing::warn!(identifier = %caller, error = %e, "threat report failed"),
            }
        }
        events
    }

    async fn audit_threat(&self, caller: &str, event: &ThreatEvent) {
        let evidence = serde_json::json!({
            "threat_id": event.id.to_string(),
            "threat_type": event.threat_type.as_str(),
            "level": event.level.as_str(),
            "automatic_action_taken": event.automatic_action_taken,
            "evidence": event.evidence,
        });
        if let Err(e) = self
            .audit
            .log_security_event(
                "threat_detected",
                severity_for(event.level),
                Some(caller),
                &event.description,
                evidence,
            )
            .await
        {
            tracing::warn!(error = %e, threat_id = %event.id, "threat event could not be audited");
        }
    }
}

fn caller_identity(ctx: &VerificationContext, holder_did: Option<&str>) -> String {
    ctx.client_id
        .as_deref()
        .or(holder_did)
        .unwrap_or(ANONYMOUS_CALLER)
        .to_string()
}

fn tracked_identity(ctx: &VerificationContext, progress: &Progress) -> String {
    if let Some(client) = &ctx.client_id {
        return client.clone();
    }
    match &progress.holder_did {
        Some(holder) if progress.authenticated => holder.clone(),
        Some(holder) => format!("{UNVERIFIED_PREFIX}{holder}"),
        None => ANONYMOUS_CALLER.to_string(),
    }
}

fn severity_for(level: ThreatLevel) -> AuditSeverity {
    match level {
        ThreatLevel::Low | ThreatLevel::Medium => AuditSeverity::Warning,
        ThreatLevel::High => AuditSeverity::Error,
        ThreatLevel::Critical => AuditSeverity::Critical,
    }
}

fn failure_reason(outcome: &Result<VerificationReport, VerificationError>) -> Option<String> {
    match outcome {
        Ok(report) if report.verified => None,
        Ok(report) => {
            let inactive: Vec<String> = report
                .unverified_credentials()
                .map(|c| match c.status {
                    Some(status) => format!("{} is {status}", c.credential_id),
                    None => format!("{} is unknown", c.credential_id),
                })
                .collect();
            Some(format!("inactive credentials: {}", inactive.join(", ")))
        }
        Err(e) => Some(e.to_string()),
    }
}

fn attempt_metadata(caller: &str, outcome: &Result<VerificationReport, VerificationError>) -> serde_json::Value {
    match outcome {
        Ok(report) => serde_json::json!({
            "caller": caller,
            "key_id": report.key_id,
            "credentials": report
                .credentials
                .iter()
                .map(|c| serde_json::json!({
                    "id": c.credential_id,
                    "status": c.status.map(CredentialStatus::as_str),
                }))
                .collect::<Vec<_>>(),
        }),
        Err(e) => serde_json::json!({
            "caller": caller,
            "stage": e.stage().as_str(),
        }),
    }
}

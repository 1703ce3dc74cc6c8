//! End-to-end scenarios across parser, validator, replay guard, rate
//! limiter, threat detector, audit trail and the assembled verifier.

use std::sync::Arc;

use aura_audit::{
    AuditCategory, AuditConfig, AuditEvent, AuditFilter, AuditLogger, AuditOutcome, AuditStore, JsonLinesAuditStore,
    MemoryAuditStore, REDACTED,
};
use aura_core::ManualClock;
use aura_qr::{
    DisclosureContext, ParseOptions, QrParser, QrPresentation, QrValidationError, QrValidator,
    ValidationOptions, DEFAULT_SCHEME, DEFAULT_VERB, PROTOCOL_VERSION,
};
use aura_security::{
    JitterConfig, MemoryActivityStore, MemoryNonceStore, MemoryRateLimitStore, NonceConfig, NonceError, NonceManager,
    RateLimitConfig, RateLimitError, RateLimiter, ThreatConfig, ThreatDetector, ThreatError, ThreatLevel, ThreatType,
    TrackRequest,
};
use aura_verifier::{
    CredentialStatus, DidDocument, Stage, StaticDidResolver, StaticStatusProvider, VerificationContext,
    VerificationError, Verifier, VerifierConfig,
};
use ed25519_dalek::Signer;

const NOW_MS: i64 = 1_768_478_400_000;
const NOW_SECS: i64 = NOW_MS / 1000;
const HOLDER: &str = "did:aura:mainnet:abc123";

fn clock() -> ManualClock {
    ManualClock::new(NOW_MS)
}

fn payload(exp: i64) -> QrPresentation {
    let mut ctx = DisclosureContext::new();
    ctx.insert("show_age_over_21".to_string(), true);
    QrPresentation {
        version: PROTOCOL_VERSION.to_string(),
        presentation_id: "pres-1".to_string(),
        holder_did: HOLDER.to_string(),
        credential_ids: vec!["vc-1".to_string()],
        context: ctx,
        expiration: exp,
        nonce: 42,
        signature: "a".repeat(128),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Component scenarios
// =========================================================================

#[test]
fn valid_presentation_parses_and_validates() {
    let raw = payload(NOW_SECS + 3_600).to_qr_string(DEFAULT_SCHEME, DEFAULT_VERB);
    assert!(raw.starts_with("aura://verify?data="));

    let parsed = QrParser::with_clock(ParseOptions::default(), Arc::new(clock())).parse(&raw).unwrap();
    assert_eq!(parsed, payload(NOW_SECS + 3_600));

    let validator = QrValidator::with_clock(ValidationOptions::default(), Arc::new(clock()));
    let result = validator.validate(&parsed);
    assert!(result.valid);
    assert!(result.errors.is_empty());
}

#[test]
fn expired_presentation_raises_expiry_with_tolerance() {
    let raw = payload(NOW_SECS - 3_600).to_qr_string(DEFAULT_SCHEME, DEFAULT_VERB);
    let parsed = QrParser::with_clock(ParseOptions::default(), Arc::new(clock())).parse(&raw).unwrap();

    let validator = QrValidator::with_clock(ValidationOptions::default(), Arc::new(clock()));
    match validator.validate_strict(&parsed).unwrap_err() {
        QrValidationError::Expired(e) => {
            assert!(e.is_within_tolerance(7_200));
            assert!(!e.is_within_tolerance(60));
        }
        other => panic!("expected expiry, got {other:?}"),
    }
}

#[tokio::test]
async fn replayed_nonce_is_rejected_within_window() {
    let clock = clock();
    let manager = NonceManager::new(
        NonceConfig::default(),
        Arc::new(MemoryNonceStore::new()),
        Arc::new(clock.clone()),
    );
    manager.validate_nonce("999", NOW_MS).await.unwrap();

    clock.advance(NonceConfig::default().window_ms - 1);
    let err = manager.validate_nonce("999", NOW_MS).await.unwrap_err();
    assert!(matches!(err, NonceError::Replay { .. }));
}

#[tokio::test]
async fn sixth_request_in_window_is_rate_limited() {
    let config = RateLimitConfig {
        max_requests: 5,
        window_ms: 60_000,
        burst_capacity: 5,
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::new(
        config,
        JitterConfig::disabled(),
        Arc::new(MemoryRateLimitStore::new()),
        Arc::new(clock()),
    );
    for _ in 0..5 {
        limiter.check_limit("client-a", 1).await.unwrap();
    }
    let err = limiter.check_limit("client-a", 1).await.unwrap_err();
    assert!(matches!(err, RateLimitError::Exceeded { retry_after_ms, .. } if retry_after_ms > 0));
}

#[tokio::test]
async fn five_failures_raise_one_brute_force_event() {
    let detector = ThreatDetector::new(
        ThreatConfig {
            max_failed_attempts: 5,
            ..ThreatConfig::default()
        },
        Arc::new(MemoryActivityStore::new()),
        Arc::new(clock()),
    );
    let mut events = Vec::new();
    for _ in 0..5 {
        match detector.track_verification(&TrackRequest::new("client-b", false)).await {
            Ok(raised) => events.extend(raised),
            Err(ThreatError::Blocked { .. }) => break,
            Err(e) => panic!("{e}"),
        }
    }
    let brute: Vec<_> = events
        .iter()
        .filter(|e| e.threat_type == ThreatType::BruteForce)
        .collect();
    assert_eq!(brute.len(), 1);
    assert!(brute[0].level >= ThreatLevel::High);
}

#[tokio::test]
async fn audit_chain_detects_message_edit_and_redacts_secrets() {
    let store = Arc::new(MemoryAuditStore::new());
    let logger = AuditLogger::open(AuditConfig::default(), store.clone(), Arc::new(clock()))
        .await
        .unwrap();
    for i in 0..5 {
        logger
            .log(
                AuditEvent::new(AuditCategory::System, "op", AuditOutcome::Success, format!("event {i}"))
                    .meta("password", "hunter2"),
            )
            .await
            .unwrap();
    }
    assert!(logger.verify_integrity().await.unwrap());

    let entries = logger.query(&AuditFilter::default()).await.unwrap();
    assert!(entries.iter().all(|e| e.metadata["password"] == REDACTED));

    let mut tampered = store.load_all().await.unwrap();
    tampered[2].message = "event two".to_string();
    assert!(!aura_audit::verify_integrity(&tampered));
}

// =========================================================================
// Full pipeline
// =========================================================================

struct Gate {
    verifier: Verifier,
    key: ed25519_dalek::SigningKey,
}

async fn gate(store: Arc<dyn AuditStore>, clock: ManualClock) -> Gate {
    let key = ed25519_dalek::SigningKey::from_bytes(&[7; 32]);
    let resolver = Arc::new(StaticDidResolver::new());
    resolver.insert(DidDocument::with_key(HOLDER, hex(key.verifying_key().as_bytes())));
    let status = Arc::new(StaticStatusProvider::new());
    status.set("vc-1", CredentialStatus::Active);

    let mut config = VerifierConfig::default();
    config.jitter.enabled = false;
    let verifier = Verifier::builder(config, resolver, status)
        .clock(Arc::new(clock))
        .audit_store(store)
        .build()
        .await
        .unwrap();
    Gate { verifier, key }
}

fn signed_code(key: &ed25519_dalek::SigningKey, nonce: u64) -> String {
    let mut p = payload(NOW_SECS + 3_600);
    p.nonce = nonce;
    p.presentation_id = format!("pres-{nonce}");
    let message = p.signing_payload().unwrap();
    p.signature = hex(&key.sign(message.as_bytes()).to_bytes());
    p.to_qr_string(DEFAULT_SCHEME, DEFAULT_VERB)
}

#[tokio::test]
async fn verified_scan_is_written_to_a_durable_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let store: Arc<dyn AuditStore> = Arc::new(JsonLinesAuditStore::new(&path));
    let g = gate(store.clone(), clock()).await;

    let ctx = VerificationContext::new().with_client("kiosk-1").with_location("DE");
    let report = g.verifier.verify(&signed_code(&g.key, 1), &ctx).await.unwrap();
    assert!(report.verified);
    let err = g.verifier.verify(&signed_code(&g.key, 1), &ctx).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Validate);
    g.verifier.shutdown().await.unwrap();

    let entries = store.load_all().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].outcome, AuditOutcome::Success);
    assert_eq!(entries[1].category, AuditCategory::Security);
    assert_eq!(entries[1].metadata["threat_type"], "replay_attack");
    assert_eq!(entries[2].outcome, AuditOutcome::Failure);
    assert_eq!(entries[2].metadata["stage"], "validate");
    aura_audit::verify_chain(&entries).unwrap();
}

#[tokio::test]
async fn forged_signatures_lead_to_an_automatic_block() {
    let store = Arc::new(MemoryAuditStore::new());
    let g = gate(store.clone(), clock()).await;
    let forger = ed25519_dalek::SigningKey::from_bytes(&[8; 32]);
    let ctx = VerificationContext::new().with_client("attacker");

    for nonce in 100..105 {
        let err = g.verifier.verify(&signed_code(&forger, nonce), &ctx).await.unwrap_err();
        assert!(matches!(err, VerificationError::SignatureInvalid { .. }));
    }
    assert!(g.verifier.threat_detector().is_blocked("attacker").await.unwrap());

    let err = g
        .verifier
        .verify(&signed_code(&g.key, 105), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::ThreatCheck);

    let honest = VerificationContext::new().with_client("kiosk-2");
    assert!(g.verifier.verify(&signed_code(&g.key, 106), &honest).await.unwrap().verified);

    let security = g
        .verifier
        .audit_logger()
        .query(&AuditFilter {
            category: Some(AuditCategory::Security),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert!(security.iter().any(|e| e.action == "threat_detected"
        && e.metadata["threat_type"] == "brute_force"
        && e.outcome == AuditOutcome::Blocked));
    assert!(g.verifier.audit_logger().verify_integrity().await.unwrap());
}

#[tokio::test]
async fn captured_code_stays_spent_after_the_nonce_window() {
    let clock = clock();
    let g = gate(Arc::new(MemoryAuditStore::new()), clock.clone()).await;
    let raw = signed_code(&g.key, 7);
    assert!(g.verifier.verify(&raw, &VerificationContext::new()).await.unwrap().verified);

    clock.advance(NonceConfig::default().window_ms + 1);
    let err = g.verifier.verify(&raw, &VerificationContext::new()).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Validate);
    assert!(matches!(err, VerificationError::Validation(QrValidationError::Nonce { nonce: 7 })));

    // Still refused after background cleanup has run.
    clock.advance(1_800_000);
    g.verifier.nonce_manager().cleanup().await.unwrap();
    assert!(g.verifier.verify(&raw, &VerificationContext::new()).await.is_err());
}

#[tokio::test]
async fn forgeries_naming_a_holder_do_not_lock_them_out() {
    let g = gate(Arc::new(MemoryAuditStore::new()), clock()).await;
    let forger = ed25519_dalek::SigningKey::from_bytes(&[8; 32]);
    let anonymous = VerificationContext::new();

    for nonce in 200..205 {
        let err = g.verifier.verify(&signed_code(&forger, nonce), &anonymous).await.unwrap_err();
        assert!(matches!(err, VerificationError::SignatureInvalid { .. }));
    }
    assert!(!g.verifier.threat_detector().is_blocked(HOLDER).await.unwrap());

    let report = g.verifier.verify(&signed_code(&g.key, 205), &anonymous).await.unwrap();
    assert!(report.verified);
}

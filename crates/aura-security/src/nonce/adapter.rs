//! Bridge from the presentation validator to the nonce manager.

use std::sync::Arc;

use async_trait::async_trait;
use aura_qr::{NonceCheckError, NonceChecker, QrPresentation};

use super::NonceManager;
use crate::error::NonceError;

/// [`NonceChecker`] that scopes each nonce to its presentation ID.
///
/// The key is `<presentation_id>:<nonce>`, so equal nonce values in
/// different presentations do not collide. Presentations carry no creation
/// time, so the nonce is treated as created at the moment it is first seen.
/// The record is kept until the presentation expires (plus the validator's
/// expiry grace), so a captured code cannot be replayed after the nonce
/// window passes.
#[derive(Debug, Clone)]
pub struct PresentationNonceAdapter {
    manager: Arc<NonceManager>,
    expiry_grace_ms: i64,
}

impl PresentationNonceAdapter {
    /// Adapter over a shared manager.
    pub fn new(manager: Arc<NonceManager>) -> Self {
        Self {
            manager,
            expiry_grace_ms: 0,
        }
    }

    /// Keep records this much longer than the presentation's expiry. Set
    /// it to the tolerance the validator applies to expired presentations.
    pub fn with_expiry_grace_ms(mut self, grace_ms: i64) -> Self {
        self.expiry_grace_ms = grace_ms.max(0);
        self
    }

    /// The store key for a presentation.
    pub fn key_for(presentation: &QrPresentation) -> String {
        format!("{}:{}", presentation.presentation_id, presentation.nonce)
    }

    /// Instant until which the presentation's nonce must be remembered.
    pub fn retain_until_ms(&self, presentation: &QrPresentation) -> i64 {
        presentation
            .expiration
            .saturating_mul(1000)
            .saturating_add(self.expiry_grace_ms)
    }

    /// Validate the presentation's nonce directly, surfacing the precise
    /// [`NonceError`].
    ///
    /// # Errors
    ///
    /// See [`NonceManager::validate_nonce_until`].
    pub async fn validate(&self, presentation: &QrPresentation) -> Result<(), NonceError> {
        let now = self.manager.clock().now_millis();
        self.manager
            .validate_nonce_until(&Self::key_for(presentation), now, self.retain_until_ms(presentation))
            .await
    }
}

#[async_trait]
impl NonceChecker for PresentationNonceAdapter {
    async fn check_nonce(&self, presentation: &QrPresentation) -> Result<bool, NonceCheckError> {
        match self.validate(presentation).await {
            Ok(()) => Ok(true),
            Err(NonceError::Storage(e)) => Err(Box::new(e)),
            Err(_) => Ok(false),
        }
    }
}

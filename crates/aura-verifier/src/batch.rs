//! Bounded-concurrency batch verification.
//!
//! At most `batch.max_concurrency` verifications run at once; the rest wait
//! for a permit. When the batch-wide budget runs out the call returns
//! [`VerificationError::BatchTimeout`] and unfinished verifications are
//! detached, not aborted: each still completes its nonce, rate-limit,
//! threat and audit bookkeeping on its own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::VerificationError;
use crate::pipeline::{VerificationContext, VerificationReport, Verifier};

/// One raw code and the context it was scanned in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub raw: String,
    #[serde(default)]
    pub context: VerificationContext,
}

impl BatchItem {
    /// Item with an empty context.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            context: VerificationContext::default(),
        }
    }
}

impl Verifier {
    /// Verify `items` concurrently. Results are in input order.
    ///
    /// # Errors
    ///
    /// [`VerificationError::BatchTimeout`] if the whole batch does not finish
    /// within `batch.timeout_ms`. Per-item failures are returned in the
    /// result vector, not as an error.
    pub async fn verify_batch(
        self: &Arc<Self>,
        items: Vec<BatchItem>,
    ) -> Result<Vec<Result<VerificationReport, VerificationError>>, VerificationError> {
        let total = items.len();
        let permits = Arc::new(Semaphore::new(self.config.batch.max_concurrency));
        let completed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let this = Arc::clone(self);
                let permits = Arc::clone(&permits);
                let completed = Arc::clone(&completed);
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| VerificationError::Task(e.to_string()))?;
                    let result = this.verify(&item.raw, &item.context).await;
                    completed.fetch_add(1, Ordering::Relaxed);
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        let collect = async {
            for handle in handles {
                results.push(match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(VerificationError::Task(e.to_string())),
                });
            }
        };
        let timeout_ms = self.config.batch.timeout_ms;
        let finished = tokio::time::timeout(Duration::from_millis(timeout_ms), collect)
            .await
            .is_ok();
        if !finished {
            let completed = completed.load(Ordering::Relaxed);
            tracing::warn!(timeout_ms, completed, total, "batch verification timed out");
            return Err(VerificationError::BatchTimeout {
                timeout_ms,
                completed,
                total,
            });
        }
        tracing::debug!(total, "batch verification finished");
        Ok(results)
    }
}

//! # Background Tasks
//!
//! Periodic maintenance loops (nonce eviction, bucket eviction, threat
//! pruning, audit flushing) run as tokio tasks owned by a
//! [`BackgroundTask`] handle. Stopping or dropping the handle aborts the
//! loop, so a forgotten timer never keeps the runtime alive at shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owned handle to a periodic background loop.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first tick fires one full period after spawning. Ticks never
    /// overlap: a slow tick delays the next one instead of queueing a burst.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "background task started");
        Self {
            name,
            handle: Some(handle),
        }
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True while the loop has not been stopped.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!(task = self.name, "background task stopped");
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut task = BackgroundTask::spawn_periodic("test", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(task.is_running());
        assert_eq!(task.name(), "test");

        tokio::time::sleep(Duration::from_millis(350)).await;
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        task.stop();
        task.stop();
        assert!(!task.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = BackgroundTask::spawn_periodic("drop", Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(task);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

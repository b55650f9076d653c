//! Periodic Task
//!
//! A cancellable background job that runs on a fixed interval. Used for the
//! TTL sweep and the binary's metrics report.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Handle to a spawned periodic job.
///
/// The job stops when [`PeriodicTask::stop`] is awaited, when
/// [`PeriodicTask::cancel`] is called, or when the handle is dropped.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns `job` to run every `period`, first run one period from now.
    ///
    /// The job reports how many items it processed. A failed run is logged
    /// and the loop carries on with the next tick. Cancellation is observed
    /// while waiting between runs and ends the loop without error.
    ///
    /// # Example
    /// ```ignore
    /// let task = PeriodicTask::spawn("ttl-sweep", Duration::from_secs(30), move || {
    ///     let cache = cache.clone();
    ///     async move { Ok(cache.cleanup_expired().await) }
    /// });
    /// // Later, during shutdown:
    /// task.stop().await;
    /// ```
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<usize>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(task = name, period_ms = period.as_millis() as u64, "Starting periodic task");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match job().await {
                    Ok(processed) if processed > 0 => {
                        debug!(task = name, processed, "Periodic run complete");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(task = name, error = %err, "Periodic run failed, will retry next tick");
                    }
                }
            }

            debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Requests the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(task = self.name, error = %err, "Periodic task ended abnormally");
                }
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_each_tick() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = PeriodicTask::spawn("test", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_survives_failed_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = PeriodicTask::spawn("flaky", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err(CacheError::Internal("transient".to_string()))
                } else {
                    Ok(1)
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(!task.is_finished());

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt_and_silent() {
        let task = PeriodicTask::spawn("idle", Duration::from_secs(3600), || async { Ok(0) });
        assert_eq!(task.name(), "idle");

        // Completes without waiting for the hour-long tick
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = PeriodicTask::spawn("dropped", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });
        drop(task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

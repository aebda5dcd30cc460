//! Background cleanup scheduler

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A cancellable periodic sweep
///
/// Dropping the scheduler cancels the task; [`CleanupScheduler::stop`]
/// additionally waits for an in-flight sweep to finish.
pub struct CleanupScheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CleanupScheduler {
    /// Spawn a task that calls `sweep` every `period`
    ///
    /// The first sweep happens one full period after spawning. `sweep`
    /// returns how many entries it removed.
    pub fn spawn<F, Fut>(period: Duration, sweep: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = u64> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        info!(
            "Starting background cache cleanup task (interval: {:?})",
            period
        );

        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Skip the first tick (which fires immediately)
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("Running scheduled cache cleanup");
                        let removed = sweep().await;
                        if removed > 0 {
                            info!("Scheduled cleanup removed {} expired entries", removed);
                        }
                    }
                }
            }

            info!("Background cache cleanup task stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//! Background maintenance loops.
//!
//! Two periodic jobs run independently of request tasks:
//!
//! - cache sweep: `purge_expired` on the response cache;
//! - health probe: re-validate providers marked unhealthy.
//!
//! Both share one `CancellationToken` and are tracked by a `TaskTracker`, so
//! [`BackgroundTasks::shutdown`] stops them as a unit and waits for them to
//! exit. Nothing is started implicitly; the owner calls `spawn`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::manager::ProviderManager;
use crate::storage::cache::ResponseCache;

/// How long `shutdown` waits for loops to exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundTasks {
    /// Start the sweep (when a cache is configured) and the health probe.
    #[must_use]
    pub fn spawn(
        cache: Option<Arc<ResponseCache>>,
        manager: Arc<ProviderManager>,
        sweep_interval: Duration,
        probe_interval: Duration,
    ) -> Self {
        let tasks = Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        if let Some(cache) = cache {
            tasks.every("cache-sweep", sweep_interval, move || {
                let cache = Arc::clone(&cache);
                async move {
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!(purged, "Swept expired cache entries");
                    }
                }
            });
        }

        tasks.every("health-probe", probe_interval, move || {
            let manager = Arc::clone(&manager);
            async move {
                for (provider, recovered) in manager.probe_unhealthy().await {
                    if recovered {
                        tracing::info!(provider = %provider, "Health probe succeeded");
                    }
                }
            }
        });

        tasks
    }

    /// Run `job` every `interval` until cancelled. The first run happens
    /// after one full interval.
    fn every<F, Fut>(&self, name: &'static str, interval: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(task = name, interval_secs = interval.as_secs(), "Background task started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = job() => {}
                        }
                    }
                }
            }
            tracing::debug!(task = name, "Background task stopped");
        });
    }

    /// Number of loops still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every loop and wait up to [`SHUTDOWN_GRACE`] for them to exit.
    /// Returns whether all loops stopped in time.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let stopped = tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_ok();
        if !stopped {
            tracing::warn!(remaining = self.tracker.len(), "Background tasks did not stop in time");
        }
        stopped
    }
}

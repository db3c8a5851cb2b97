//! Periodic maintenance running next to the HTTP server
use std::{future::Future, sync::Arc, time::Duration};

use distributor_resolver::LatencyProber;
use observability_deps::tracing::{debug, info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::service::AssetService;

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    /// Reload of metadata, served buckets and storage operators
    pub metadata_refresh_interval: Duration,
    /// Removal of cached objects that are no longer served
    pub cache_cleanup_interval: Duration,
    /// Latency probing of storage operators
    pub latency_check_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            metadata_refresh_interval: Duration::from_secs(60),
            cache_cleanup_interval: Duration::from_secs(60),
            latency_check_interval: Duration::from_secs(60),
        }
    }
}

/// The set of background tasks, stopped together on shutdown
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` every `period` until shutdown. The first run happens one period after the call.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                debug!(task = name, "running background task");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = f() => {}
                }
            }
            debug!(task = name, "background task stopped");
        });
    }

    /// Start metadata refresh, cache cleanup and latency probing
    pub fn start_maintenance(
        &self,
        assets: Arc<AssetService>,
        prober: Arc<LatencyProber>,
        config: MaintenanceConfig,
    ) {
        let refresh_assets = Arc::clone(&assets);
        self.spawn_periodic(
            "metadata_refresh",
            config.metadata_refresh_interval,
            move || {
                let assets = Arc::clone(&refresh_assets);
                async move {
                    if let Err(error) = assets.refresh_metadata().await {
                        warn!(%error, "failed to refresh metadata");
                    }
                }
            },
        );

        let cleanup_assets = Arc::clone(&assets);
        self.spawn_periodic("cache_cleanup", config.cache_cleanup_interval, move || {
            cleanup_assets.cleanup();
            async {}
        });

        self.spawn_periodic(
            "latency_check",
            config.latency_check_interval,
            move || {
                let targets = assets.coordinator().resolver().probe_targets();
                let prober = Arc::clone(&prober);
                async move { prober.probe(targets).await }
            },
        );
    }

    /// Stop all tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("background tasks stopped");
    }
}

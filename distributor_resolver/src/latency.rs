use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{StreamExt, stream};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use url::Url;

/// Samples kept per endpoint
const MAX_SAMPLES: usize = 10;

/// Probes run concurrently by one [`LatencyProber::probe`] round
const PROBE_CONCURRENCY: usize = 8;

/// Keeps the most recent latency samples measured for each origin endpoint
#[derive(Debug, Default)]
pub struct LatencyTracker {
    samples: Mutex<HashMap<Url, VecDeque<Duration>>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: &Url, latency: Duration) {
        let mut samples = self.samples.lock();
        let samples = samples.entry(endpoint.clone()).or_default();
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Mean of the recent samples for `endpoint`, `None` if it was never measured
    pub fn mean(&self, endpoint: &Url) -> Option<Duration> {
        let samples = self.samples.lock();
        let samples = samples.get(endpoint).filter(|s| !s.is_empty())?;
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }
}

/// An origin endpoint and the URL used to measure latency to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub endpoint: Url,
    pub target: Url,
}

/// Measures round-trip latency to origin endpoints and feeds a [`LatencyTracker`]
#[derive(Debug)]
pub struct LatencyProber {
    client: reqwest::Client,
    timeout: Duration,
    tracker: Arc<LatencyTracker>,
}

impl LatencyProber {
    pub fn new(client: reqwest::Client, timeout: Duration, tracker: Arc<LatencyTracker>) -> Self {
        Self {
            client,
            timeout,
            tracker,
        }
    }

    /// Probe every target once; failed probes are logged and not recorded
    pub async fn probe(&self, targets: Vec<ProbeTarget>) {
        stream::iter(targets)
            .for_each_concurrent(PROBE_CONCURRENCY, |target| async move {
                match self.measure(&target.target).await {
                    Ok(latency) => {
                        debug!(endpoint = %target.endpoint, ?latency, "measured latency");
                        self.tracker.record(&target.endpoint, latency);
                    }
                    Err(error) => {
                        warn!(endpoint = %target.endpoint, %error, "latency probe failed");
                    }
                }
            })
            .await;
    }

    async fn measure(&self, target: &Url) -> Result<Duration, reqwest::Error> {
        let start = Instant::now();
        self.client
            .head(target.clone())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(start.elapsed())
    }
}

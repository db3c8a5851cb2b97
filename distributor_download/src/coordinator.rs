use std::{
    collections::HashMap,
    fmt::Debug,
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use distributor_cache::{CacheEntry, CacheStore, ContentDir};
use distributor_resolver::EndpointResolver;
use distributor_types::{
    CONTENT_SNIFF_LEN, ContentHasher, DataObjectRecord, ObjectId, OriginClient, OriginResponse,
    resolve_content_type,
};
use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, Shared},
};
use iox_time::{Time, TimeProvider};
use metric::Registry;
use observability_deps::tracing::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncWriteExt, BufWriter},
    sync::Semaphore,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    AttemptError, AttemptFailure, DownloadError, IntegrityError, Payload, TransientFile,
    metrics::DownloadMetrics,
};

/// Upper bound on the buffer reserved up front when spooling a payload to memory
const MAX_MEMORY_PREALLOCATION: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DownloadConfig {
    /// Downloads running at the same time; further downloads queue
    pub max_concurrent_downloads: usize,
    /// Time allowed for an origin to send its response head, and then each chunk of the body
    pub attempt_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 20,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

type SharedDownload = Shared<BoxFuture<'static, Result<Arc<Payload>, DownloadError>>>;

/// A download registered for an object
struct InFlight {
    download: SharedDownload,
    cancel: CancellationToken,
    waiters: usize,
    /// Distinguishes this download from earlier or later ones for the same object
    generation: u64,
    /// The payload is verified and being moved into place; the download can no longer be
    /// cancelled
    claimed: bool,
}

impl Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("waiters", &self.waiters)
            .field("generation", &self.generation)
            .field("claimed", &self.claimed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Inner {
    origin: Arc<dyn OriginClient>,
    resolver: Arc<EndpointResolver>,
    cache: Arc<CacheStore>,
    content_dir: ContentDir,
    time_provider: Arc<dyn TimeProvider>,
    gate: Semaphore,
    attempt_timeout: Duration,
    in_flight: Mutex<HashMap<ObjectId, InFlight>>,
    next_generation: AtomicU64,
    metrics: DownloadMetrics,
}

/// Fetches objects from their origins, running at most one download per object.
///
/// A download tries the candidate endpoints of an object strictly one after another. Each attempt
/// streams the body into a partial file while hashing it; the first attempt that delivers exactly
/// the declared size and hash wins and its file is moved into the [`CacheStore`]. Failed
/// attempts move on to the next candidate. Waiters only ever see a verified payload.
///
/// Callers of [`fetch`](Self::fetch) for an object that is already downloading join that
/// download. When every caller of a download has gone away before its payload is verified the
/// download is cancelled; a cancelled download never adds anything to the cache.
///
/// Payloads that can't be written to disk are kept in memory and payloads larger than the whole
/// cache are served from a transient file; neither is cached.
#[derive(Debug, Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    pub fn new(
        config: DownloadConfig,
        origin: Arc<dyn OriginClient>,
        resolver: Arc<EndpointResolver>,
        cache: Arc<CacheStore>,
        content_dir: ContentDir,
        time_provider: Arc<dyn TimeProvider>,
        metric_registry: &Registry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin,
                resolver,
                cache,
                content_dir,
                time_provider,
                gate: Semaphore::new(config.max_concurrent_downloads),
                attempt_timeout: config.attempt_timeout,
                in_flight: Default::default(),
                next_generation: AtomicU64::new(0),
                metrics: DownloadMetrics::new(metric_registry),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn resolver(&self) -> &Arc<EndpointResolver> {
        &self.inner.resolver
    }

    /// Number of downloads currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, id: &ObjectId) -> bool {
        self.inner.in_flight.lock().contains_key(id)
    }

    /// Get the verified payload of `record`, from the cache or by downloading it.
    ///
    /// Returns [`DownloadError::NoCandidates`] without contacting any origin when the object
    /// has no usable access points.
    pub async fn fetch(&self, record: &DataObjectRecord) -> Result<Arc<Payload>, DownloadError> {
        let id = &record.object_id;
        let (download, _waiter) = {
            let mut in_flight = self.inner.in_flight.lock();
            let (download, generation) = match in_flight.get_mut(id) {
                Some(entry) => {
                    entry.waiters += 1;
                    self.inner.metrics.dedup_join();
                    debug!(object_id = %id, waiters = entry.waiters, "joined download in flight");
                    (entry.download.clone(), entry.generation)
                }
                None => {
                    // the in-flight lock is held while a finished download moves into the cache,
                    // so an object is always either in flight or cached here
                    if let Some(entry) = self.inner.cache.get(id) {
                        return Ok(Arc::new(Payload::Cached(entry)));
                    }
                    let entry = self.start(record)?;
                    let joined = (entry.download.clone(), entry.generation);
                    in_flight.insert(id.clone(), entry);
                    joined
                }
            };
            let waiter = Waiter {
                inner: Arc::clone(&self.inner),
                object_id: id.clone(),
                generation,
            };
            (download, waiter)
        };
        download.await
    }

    /// Spawn a download task for `record`; the caller registers it
    fn start(&self, record: &DataObjectRecord) -> Result<InFlight, DownloadError> {
        let candidates = self.inner.resolver.resolve(record);
        if candidates.is_empty() {
            return Err(DownloadError::NoCandidates {
                object_id: record.object_id.clone(),
            });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = DownloadTask {
            inner: Arc::clone(&self.inner),
            record: record.clone(),
            candidates,
            generation,
            cancel: cancel.clone(),
            started_at: self.inner.time_provider.now(),
        };
        task.transition(TaskState::Pending);
        let handle = tokio::spawn(task.run());
        let download = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(DownloadError::TaskFailed(e.to_string())))
        }
        .boxed()
        .shared();

        Ok(InFlight {
            download,
            cancel,
            waiters: 1,
            generation,
            claimed: false,
        })
    }
}

/// Registration of one caller waiting on a download; the last one to leave cancels it
#[derive(Debug)]
struct Waiter {
    inner: Arc<Inner>,
    object_id: ObjectId,
    generation: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        let Some(entry) = in_flight.get_mut(&self.object_id) else {
            return;
        };
        if entry.generation != self.generation {
            return;
        }
        entry.waiters -= 1;
        if entry.waiters == 0 && !entry.claimed {
            debug!(object_id = %self.object_id, "no waiters left, cancelling download");
            entry.cancel.cancel();
            in_flight.remove(&self.object_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Fetching(usize),
    Verifying(usize),
    Succeeded,
    Failed,
    Cancelled,
}

/// A verified payload, not yet handed to the cache
#[derive(Debug)]
struct Spooled {
    content_type: String,
    data: SpooledData,
}

#[derive(Debug)]
enum SpooledData {
    File(PathBuf),
    Memory(Bytes),
}

#[derive(Debug)]
enum Sink {
    File(BufWriter<tokio::fs::File>),
    Memory(BytesMut),
}

impl Sink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::File(file) => file.write_all(chunk).await,
            Self::Memory(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
        }
    }

    async fn finish(self, path: PathBuf) -> io::Result<SpooledData> {
        match self {
            Self::File(mut file) => {
                file.flush().await?;
                file.into_inner().sync_all().await?;
                Ok(SpooledData::File(path))
            }
            Self::Memory(buf) => Ok(SpooledData::Memory(buf.freeze())),
        }
    }
}

fn storage_error(e: io::Error) -> AttemptError {
    AttemptError::Storage(e.to_string())
}

#[derive(Debug)]
struct DownloadTask {
    inner: Arc<Inner>,
    record: DataObjectRecord,
    candidates: Vec<Url>,
    generation: u64,
    cancel: CancellationToken,
    started_at: Time,
}

impl DownloadTask {
    async fn run(self) -> Result<Arc<Payload>, DownloadError> {
        let outcome = tokio::select! {
            outcome = self.download() => outcome,
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
        };
        let outcome = match outcome {
            Ok(spooled) => self.place(spooled).await,
            Err(e) => Err(e),
        };
        if matches!(outcome, Err(DownloadError::Cancelled)) {
            self.remove_partial().await;
        }
        self.settle(outcome)
    }

    fn transition(&self, state: TaskState) {
        debug!(
            object_id = %self.record.object_id,
            generation = self.generation,
            ?state,
            "download task state"
        );
    }

    fn partial_path(&self) -> PathBuf {
        self.inner
            .content_dir
            .partial_path(&self.record.object_id, self.generation)
    }

    async fn download(&self) -> Result<Spooled, DownloadError> {
        let _permit = self
            .inner
            .gate
            .acquire()
            .await
            .map_err(|_| DownloadError::Cancelled)?;

        let mut attempts = vec![];
        for (index, url) in self.candidates.iter().enumerate() {
            self.transition(TaskState::Fetching(index));
            let mut spool_to_disk = true;
            loop {
                let error = match self.attempt(index, url, spool_to_disk).await {
                    Ok(spooled) => {
                        self.inner.metrics.attempt_succeeded();
                        return Ok(spooled);
                    }
                    Err(error) => error,
                };
                self.inner.metrics.attempt_failed(&error);
                self.remove_partial().await;

                match &error {
                    AttemptError::Storage(_) if spool_to_disk => {
                        warn!(
                            object_id = %self.record.object_id,
                            %url,
                            %error,
                            "cannot spool payload to disk, retrying in memory"
                        );
                        spool_to_disk = false;
                        continue;
                    }
                    AttemptError::IntegrityMismatch(_) => error!(
                        object_id = %self.record.object_id,
                        %url,
                        %error,
                        "origin served corrupt payload"
                    ),
                    _ => warn!(
                        object_id = %self.record.object_id,
                        %url,
                        %error,
                        "origin failed to deliver payload"
                    ),
                }
                attempts.push(AttemptFailure {
                    url: url.clone(),
                    error,
                });
                break;
            }
        }

        Err(DownloadError::NoViableSource {
            object_id: self.record.object_id.clone(),
            attempts,
        })
    }

    /// Fetch the object from one candidate and verify it against the record
    async fn attempt(
        &self,
        index: usize,
        url: &Url,
        spool_to_disk: bool,
    ) -> Result<Spooled, AttemptError> {
        let attempt_timeout = self.inner.attempt_timeout;
        let OriginResponse {
            content_type,
            mut body,
        } = timeout(attempt_timeout, self.inner.origin.get(url))
            .await
            .map_err(|_| AttemptError::Timeout(attempt_timeout))??;

        let expected = self.record.size_bytes;
        let path = self.partial_path();
        let mut sink = if spool_to_disk {
            let file = tokio::fs::File::create(&path)
                .await
                .map_err(storage_error)?;
            Sink::File(BufWriter::new(file))
        } else {
            Sink::Memory(BytesMut::with_capacity(
                expected.min(MAX_MEMORY_PREALLOCATION) as usize,
            ))
        };

        let mut hasher = ContentHasher::new();
        let mut head = Vec::with_capacity(CONTENT_SNIFF_LEN.min(expected as usize));
        let mut received = 0u64;
        loop {
            let chunk = match timeout(attempt_timeout, body.next()).await {
                Err(_) => return Err(AttemptError::Timeout(attempt_timeout)),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };
            received += chunk.len() as u64;
            if received > expected {
                return Err(IntegrityError::SizeExceeded { expected }.into());
            }
            hasher.update(&chunk);
            if head.len() < CONTENT_SNIFF_LEN {
                let missing = (CONTENT_SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..missing]);
            }
            sink.write(&chunk).await.map_err(storage_error)?;
        }

        self.transition(TaskState::Verifying(index));
        if received != expected {
            return Err(IntegrityError::SizeMismatch {
                expected,
                actual: received,
            }
            .into());
        }
        let actual = hasher.finalize();
        if actual != self.record.content_hash {
            return Err(IntegrityError::HashMismatch {
                expected: self.record.content_hash,
                actual,
            }
            .into());
        }

        Ok(Spooled {
            content_type: resolve_content_type(content_type.as_deref(), &head),
            data: sink.finish(path).await.map_err(storage_error)?,
        })
    }

    async fn remove_partial(&self) {
        let path = self.partial_path();
        if let Err(error) = tokio::fs::remove_file(&path).await {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to remove partial download");
            }
        }
    }

    /// Claim a verified download so its waiters leaving no longer cancel it, then move the
    /// payload to where waiters read it from. Fails if the download was cancelled first.
    async fn place(&self, spooled: Spooled) -> Result<Payload, DownloadError> {
        if !self.claim() {
            return Err(DownloadError::Cancelled);
        }

        let Spooled { content_type, data } = spooled;
        let id = &self.record.object_id;
        let size_bytes = self.record.size_bytes;

        let partial = match data {
            SpooledData::Memory(bytes) => {
                return Ok(Payload::Memory {
                    bytes,
                    content_type,
                });
            }
            SpooledData::File(partial) => partial,
        };

        if !self.inner.cache.fits(size_bytes) {
            info!(
                object_id = %id,
                size_bytes,
                capacity = self.inner.cache.capacity(),
                "object exceeds cache capacity, serving without caching"
            );
            return Ok(Payload::Transient(TransientFile::new(
                partial,
                size_bytes,
                content_type,
            )));
        }

        let location = self.inner.content_dir.object_path(id);
        if let Err(error) = tokio::fs::rename(&partial, &location).await {
            warn!(
                object_id = %id,
                %error,
                "failed to move payload into the cache, serving without caching"
            );
            return Ok(Payload::Transient(TransientFile::new(
                partial,
                size_bytes,
                content_type,
            )));
        }

        let now = self.inner.time_provider.now();
        Ok(Payload::Cached(CacheEntry {
            object_id: id.clone(),
            size_bytes,
            location,
            content_type,
            created_at: now,
            last_accessed_at: now,
        }))
    }

    /// Mark the download as claimed unless it has been cancelled; decided under the in-flight
    /// lock, which is where the last waiter cancels a download
    fn claim(&self) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        match in_flight.get_mut(&self.record.object_id) {
            Some(entry) if entry.generation == self.generation && !self.cancel.is_cancelled() => {
                entry.claimed = true;
                true
            }
            _ => false,
        }
    }

    /// Unregister the download and publish its outcome.
    ///
    /// A placed payload enters the cache under the in-flight lock, so a request never finds the
    /// object neither in flight nor cached.
    fn settle(
        &self,
        outcome: Result<Payload, DownloadError>,
    ) -> Result<Arc<Payload>, DownloadError> {
        let id = &self.record.object_id;
        let elapsed = self
            .inner
            .time_provider
            .now()
            .checked_duration_since(self.started_at);

        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .get(id)
            .is_some_and(|e| e.generation == self.generation)
        {
            in_flight.remove(id);
        }

        match outcome {
            Ok(payload) => {
                if let Payload::Cached(entry) = &payload {
                    self.inner.cache.insert(entry.clone());
                }
                drop(in_flight);
                self.transition(TaskState::Succeeded);
                self.inner.metrics.task_succeeded();
                info!(
                    object_id = %id,
                    size_bytes = payload.size(),
                    cached = payload.is_cached(),
                    ?elapsed,
                    "download complete"
                );
                Ok(Arc::new(payload))
            }
            Err(DownloadError::Cancelled) => {
                drop(in_flight);
                self.transition(TaskState::Cancelled);
                self.inner.metrics.task_cancelled();
                info!(object_id = %id, ?elapsed, "download cancelled");
                Err(DownloadError::Cancelled)
            }
            Err(error) => {
                drop(in_flight);
                self.transition(TaskState::Failed);
                self.inner.metrics.task_failed();
                warn!(object_id = %id, %error, ?elapsed, "download failed");
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DEDUP_JOINS_NAME, DOWNLOAD_ATTEMPTS_NAME, DOWNLOAD_TASKS_NAME};
    use distributor_test_helpers::{Behaviour, MockOrigin, endpoint, object_url, payload, record};
    use distributor_types::DEFAULT_CONTENT_TYPE;
    use iox_time::MockProvider;
    use metric::{Attributes, Metric, U64Counter};
    use pretty_assertions::assert_eq;

    struct Fixture {
        origin: Arc<MockOrigin>,
        cache: Arc<CacheStore>,
        content_dir: ContentDir,
        coordinator: DownloadCoordinator,
        registry: Registry,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new(capacity: u64, config: DownloadConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let content_dir = ContentDir::open(dir.path().join("content")).await.unwrap();
            let registry = Registry::new();
            let time_provider: Arc<dyn TimeProvider> =
                Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
            let cache = Arc::new(CacheStore::new(
                capacity,
                Arc::clone(&time_provider),
                &registry,
            ));
            let origin = Arc::new(MockOrigin::new());
            let coordinator = DownloadCoordinator::new(
                config,
                Arc::clone(&origin) as _,
                Arc::new(EndpointResolver::new(None, Default::default())),
                Arc::clone(&cache),
                content_dir.clone(),
                time_provider,
                &registry,
            );
            Self {
                origin,
                cache,
                content_dir,
                coordinator,
                registry,
                _dir: dir,
            }
        }

        async fn with_defaults() -> Self {
            Self::new(1024 * 1024, DownloadConfig::default()).await
        }

        fn counter<const N: usize>(
            &self,
            name: &'static str,
            attributes: [(&'static str, &'static str); N],
        ) -> u64 {
            self.registry
                .get_instrument::<Metric<U64Counter>>(name)
                .unwrap()
                .get_observer(&Attributes::from(attributes))
                .unwrap()
                .fetch()
        }

        fn files(&self) -> Vec<String> {
            let mut files: Vec<String> = std::fs::read_dir(self.content_dir.root())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            files.sort();
            files
        }

        fn spawn_fetch(
            &self,
            record: &DataObjectRecord,
        ) -> tokio::task::JoinHandle<Result<Arc<Payload>, DownloadError>> {
            let coordinator = self.coordinator.clone();
            let record = record.clone();
            tokio::spawn(async move { coordinator.fetch(&record).await })
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    fn cached_location(payload: &Payload) -> PathBuf {
        match payload {
            Payload::Cached(entry) => entry.location.clone(),
            other => panic!("expected a cached payload, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn fails_over_to_working_endpoint() {
        let f = Fixture::with_defaults().await;
        let body = payload(10_000, 1);
        let record = record("1", &body, &[endpoint(0), endpoint(1), endpoint(2)]);
        f.origin.set(object_url(&record, 0), Behaviour::Refuse);
        f.origin.set(object_url(&record, 1), Behaviour::Status(503));
        f.origin.serve(object_url(&record, 2), body.clone());

        let fetched = f.coordinator.fetch(&record).await.unwrap();
        assert_eq!(fetched.size(), 10_000);
        assert_eq!(fetched.content_type(), DEFAULT_CONTENT_TYPE);
        let location = cached_location(&fetched);
        assert_eq!(std::fs::read(&location).unwrap(), body.to_vec());
        assert!(f.cache.has(&record.object_id));
        assert_eq!(f.files(), vec!["1"]);

        for i in 0..3 {
            assert_eq!(f.origin.request_count(&object_url(&record, i)), 1);
        }
        assert_eq!(
            f.counter(DOWNLOAD_ATTEMPTS_NAME, [("result", "unavailable")]),
            2
        );
        assert_eq!(f.counter(DOWNLOAD_ATTEMPTS_NAME, [("result", "success")]), 1);
        assert_eq!(f.counter(DOWNLOAD_TASKS_NAME, [("result", "succeeded")]), 1);
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn corrupt_payloads_exhaust_candidates() {
        let f = Fixture::with_defaults().await;
        let record = record("1", &payload(1000, 1), &[endpoint(0), endpoint(1)]);
        f.origin.serve(object_url(&record, 0), payload(1000, 2));
        f.origin.serve(object_url(&record, 1), payload(1000, 3));

        let err = f.coordinator.fetch(&record).await.unwrap_err();
        let DownloadError::NoViableSource {
            object_id,
            attempts,
        } = err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(object_id, record.object_id);
        assert_eq!(attempts.len(), 2);
        for (i, attempt) in attempts.iter().enumerate() {
            assert_eq!(attempt.url, object_url(&record, i));
            assert!(matches!(
                attempt.error,
                AttemptError::IntegrityMismatch(IntegrityError::HashMismatch { .. })
            ));
        }
        assert!(!f.cache.has(&record.object_id));
        assert!(f.files().is_empty(), "partial files left: {:?}", f.files());
        assert_eq!(
            f.counter(DOWNLOAD_ATTEMPTS_NAME, [("result", "integrity")]),
            2
        );
        assert_eq!(f.counter(DOWNLOAD_TASKS_NAME, [("result", "failed")]), 1);
    }

    #[tokio::test]
    async fn wrong_sizes_are_integrity_failures() {
        let f = Fixture::with_defaults().await;
        let body = payload(100, 1);
        let record = record("1", &body, &[endpoint(0), endpoint(1)]);
        f.origin.serve(object_url(&record, 0), payload(200, 1));
        f.origin.serve(object_url(&record, 1), body.slice(..50));

        let DownloadError::NoViableSource { attempts, .. } =
            f.coordinator.fetch(&record).await.unwrap_err()
        else {
            panic!("expected NoViableSource");
        };
        let errors: Vec<_> = attempts.into_iter().map(|a| a.error).collect();
        assert_eq!(
            errors,
            vec![
                AttemptError::IntegrityMismatch(IntegrityError::SizeExceeded { expected: 100 }),
                AttemptError::IntegrityMismatch(IntegrityError::SizeMismatch {
                    expected: 100,
                    actual: 50
                }),
            ]
        );
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_fetches_share_one_download() {
        let f = Fixture::with_defaults().await;
        let body = payload(50_000, 7);
        let record = record("1", &body, &[endpoint(0)]);
        let url = object_url(&record, 0);
        let gate = f.origin.gated(url.clone(), body.clone());

        let fetches: Vec<_> = (0..5).map(|_| f.spawn_fetch(&record)).collect();
        wait_for(|| f.counter(DEDUP_JOINS_NAME, []) == 4).await;
        assert_eq!(f.coordinator.in_flight(), 1);
        gate.notify_one();

        let mut payloads = vec![];
        for fetch in fetches {
            payloads.push(fetch.await.unwrap().unwrap());
        }
        assert!(payloads.iter().all(|p| Arc::ptr_eq(p, &payloads[0])));
        assert_eq!(
            std::fs::read(cached_location(&payloads[0])).unwrap(),
            body.to_vec()
        );
        assert_eq!(f.origin.request_count(&url), 1);
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn cached_object_is_not_downloaded_again() {
        let f = Fixture::with_defaults().await;
        let body = payload(100, 1);
        let record = record("1", &body, &[endpoint(0)]);
        f.origin.serve(object_url(&record, 0), body);

        f.coordinator.fetch(&record).await.unwrap();
        let again = f.coordinator.fetch(&record).await.unwrap();
        assert!(again.is_cached());
        assert_eq!(f.origin.total_request_count(), 1);
    }

    #[tokio::test]
    async fn content_type_is_detected_when_not_declared() {
        let f = Fixture::with_defaults().await;
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&payload(5000, 1));

        let detected = record("1", &png, &[endpoint(0)]);
        f.origin.set(
            object_url(&detected, 0),
            Behaviour::Serve {
                body: png.clone().into(),
                content_type: None,
                chunk_size: 3,
            },
        );
        let declared = record("2", &png, &[endpoint(1)]);
        f.origin.set(
            object_url(&declared, 0),
            Behaviour::Serve {
                body: png.clone().into(),
                content_type: Some("video/mp4".to_string()),
                chunk_size: 4096,
            },
        );

        let fetched = f.coordinator.fetch(&detected).await.unwrap();
        assert_eq!(fetched.content_type(), "image/png");
        assert_eq!(f.cache.peek(&detected.object_id).unwrap().content_type, "image/png");
        let fetched = f.coordinator.fetch(&declared).await.unwrap();
        assert_eq!(fetched.content_type(), "video/mp4");
    }

    #[tokio::test]
    async fn no_candidates_makes_no_requests() {
        let f = Fixture::with_defaults().await;
        let record = record("1", b"orphan", &[]);
        assert!(matches!(
            f.coordinator.fetch(&record).await,
            Err(DownloadError::NoCandidates { .. })
        ));
        assert_eq!(f.origin.total_request_count(), 0);
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn unresponsive_sources_time_out() {
        let f = Fixture::new(
            1024 * 1024,
            DownloadConfig {
                max_concurrent_downloads: 4,
                attempt_timeout: Duration::from_millis(100),
            },
        )
        .await;
        let body = payload(10, 1);
        let slow = record("1", &body, &[endpoint(0), endpoint(1), endpoint(2)]);
        f.origin.set(object_url(&slow, 0), Behaviour::Hang);
        f.origin.set(
            object_url(&slow, 1),
            Behaviour::Stall { body: body.clone() },
        );
        f.origin.serve(object_url(&slow, 2), body);
        assert!(f.coordinator.fetch(&slow).await.unwrap().is_cached());
        assert_eq!(f.counter(DOWNLOAD_ATTEMPTS_NAME, [("result", "timeout")]), 2);

        let body = payload(10, 2);
        let dead = record("2", &body, &[endpoint(3), endpoint(4)]);
        f.origin.set(object_url(&dead, 0), Behaviour::Hang);
        f.origin.set(object_url(&dead, 1), Behaviour::Stall { body });
        let err = f.coordinator.fetch(&dead).await.unwrap_err();
        assert!(err.all_timed_out(), "{err}");
    }

    #[tokio::test]
    async fn failed_download_is_retried_from_scratch() {
        let f = Fixture::with_defaults().await;
        let body = payload(100, 1);
        let record = record("1", &body, &[endpoint(0)]);
        let url = object_url(&record, 0);
        f.coordinator.fetch(&record).await.unwrap_err();
        assert_eq!(f.coordinator.in_flight(), 0);

        f.origin.serve(url.clone(), body);
        f.coordinator.fetch(&record).await.unwrap();
        assert_eq!(f.origin.request_count(&url), 2);
    }

    #[tokio::test]
    async fn oversized_object_is_served_transiently() {
        let f = Fixture::new(10, DownloadConfig::default()).await;
        let body = payload(100, 1);
        let record = record("1", &body, &[endpoint(0)]);
        f.origin.serve(object_url(&record, 0), body.clone());

        let fetched = f.coordinator.fetch(&record).await.unwrap();
        let Payload::Transient(file) = fetched.as_ref() else {
            panic!("expected a transient payload, got {fetched:?}");
        };
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), body.to_vec());
        assert!(f.cache.is_empty());

        drop(fetched);
        assert!(!path.exists());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn abandoned_download_is_cancelled() {
        let f = Fixture::with_defaults().await;
        let body = payload(100, 1);
        let record = record("1", &body, &[endpoint(0)]);
        let url = object_url(&record, 0);
        let gate = f.origin.gated(url.clone(), body.clone());

        let fetch = f.spawn_fetch(&record);
        wait_for(|| f.origin.request_count(&url) == 1).await;
        fetch.abort();
        wait_for(|| !f.coordinator.is_in_flight(&record.object_id)).await;
        wait_for(|| f.counter(DOWNLOAD_TASKS_NAME, [("result", "cancelled")]) == 1).await;
        gate.notify_one();

        assert!(!f.cache.has(&record.object_id));
        assert!(f.files().is_empty());

        // a later request starts over
        f.origin.serve(url.clone(), body);
        assert!(f.coordinator.fetch(&record).await.unwrap().is_cached());
        assert_eq!(f.origin.request_count(&url), 2);
    }

    #[test_log::test(tokio::test)]
    async fn disk_failure_falls_back_to_memory() {
        let f = Fixture::with_defaults().await;
        let body = payload(1000, 1);
        let record = record("1", &body, &[endpoint(0)]);
        let url = object_url(&record, 0);
        f.origin.serve(url.clone(), body.clone());
        std::fs::remove_dir_all(f.content_dir.root()).unwrap();

        let fetched = f.coordinator.fetch(&record).await.unwrap();
        match fetched.as_ref() {
            Payload::Memory { bytes, .. } => assert_eq!(bytes, &body),
            other => panic!("expected an in-memory payload, got {other:?}"),
        }
        assert!(f.cache.is_empty());
        assert_eq!(f.origin.request_count(&url), 2);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn downloads_beyond_the_limit_queue() {
        let f = Fixture::new(
            1024 * 1024,
            DownloadConfig {
                max_concurrent_downloads: 1,
                attempt_timeout: Duration::from_secs(30),
            },
        )
        .await;
        let first_body = payload(100, 1);
        let first = record("1", &first_body, &[endpoint(0)]);
        let gate = f
            .origin
            .gated(object_url(&first, 0), first_body.clone());
        let second_body = payload(100, 2);
        let second = record("2", &second_body, &[endpoint(1)]);
        f.origin.serve(object_url(&second, 0), second_body);

        let first_fetch = f.spawn_fetch(&first);
        wait_for(|| f.origin.request_count(&object_url(&first, 0)) == 1).await;
        let second_fetch = f.spawn_fetch(&second);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.origin.request_count(&object_url(&second, 0)), 0);
        assert_eq!(f.coordinator.in_flight(), 2);

        gate.notify_one();
        first_fetch.await.unwrap().unwrap();
        second_fetch.await.unwrap().unwrap();
        assert_eq!(f.origin.request_count(&object_url(&second, 0)), 1);
    }
}

use std::{fmt::Debug, io, io::SeekFrom, path::Path, sync::Arc};

use bytes::Bytes;
use distributor_cache::{CacheEntry, CacheError, CacheStore, ContentDir};
use distributor_download::{DownloadCoordinator, DownloadError, Payload};
use distributor_resolver::{MetadataError, ObjectLocation, ObjectLocator};
use distributor_types::{DEFAULT_CONTENT_TYPE, DataObjectRecord, ObjectId};
use futures::{StreamExt, stream::BoxStream};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::range::{ByteRange, RangeRequest};

pub(crate) const CACHE_ACCESS_NAME: &str = "distributor_cache_access";

/// Read buffer size when streaming payload files
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How often a request retries after the payload it was about to read got evicted
const MAX_OPEN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No such object in the metadata
    Unknown,
    /// The object exists but is not in a bucket this node serves
    NotServed,
    /// The object has no access point an origin could be reached at
    NoAccessPoints,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown object"),
            Self::NotServed => write!(f, "object is not served by this node"),
            Self::NoAccessPoints => write!(f, "object has no access points"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("object {object_id} not found: {reason}")]
    NotFound {
        object_id: ObjectId,
        reason: NotFoundReason,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("requested range of object {object_id} lies outside its {size} bytes")]
    RangeNotSatisfiable { object_id: ObjectId, size: u64 },

    #[error("failed to read payload of object {object_id}: {source}")]
    Storage {
        object_id: ObjectId,
        source: io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// A payload ready to be streamed to one client
pub struct Asset {
    /// Size of the whole object
    pub size: u64,
    pub content_type: String,
    pub cache_status: CacheStatus,
    /// The part of the object `body` holds, `None` for all of it
    pub range: Option<ByteRange>,
    pub body: BoxStream<'static, Result<Bytes, io::Error>>,
}

impl Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("cache_status", &self.cache_status)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// What a request for an object would find right now, see [`AssetService::head`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadStatus {
    Hit { size: u64, content_type: String },
    /// A download of the object is in flight
    Pending { size: u64 },
    /// The object would have to be downloaded
    Miss { size: u64 },
}

#[derive(Debug)]
struct AccessMetrics {
    hit: U64Counter,
    miss: U64Counter,
}

impl AccessMetrics {
    fn new(registry: &Registry) -> Self {
        let access: Metric<U64Counter> = registry.register_metric(
            CACHE_ACCESS_NAME,
            "asset requests, by whether the payload was cached",
        );
        Self {
            hit: access.recorder(&[("status", "hit")]),
            miss: access.recorder(&[("status", "miss")]),
        }
    }
}

/// Serves assets from the cache, downloading them on a miss.
///
/// Every request gets its own body stream; requests for an object that is downloading share the
/// download through the [`DownloadCoordinator`].
#[derive(Debug)]
pub struct AssetService {
    locator: Arc<ObjectLocator>,
    coordinator: DownloadCoordinator,
    content_dir: ContentDir,
    metrics: AccessMetrics,
}

impl AssetService {
    pub fn new(
        locator: Arc<ObjectLocator>,
        coordinator: DownloadCoordinator,
        content_dir: ContentDir,
        metric_registry: &Registry,
    ) -> Self {
        Self {
            locator,
            coordinator,
            content_dir,
            metrics: AccessMetrics::new(metric_registry),
        }
    }

    pub fn locator(&self) -> &Arc<ObjectLocator> {
        &self.locator
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.coordinator.cache()
    }

    async fn record(&self, id: &ObjectId) -> Result<DataObjectRecord, ServeError> {
        let reason = match self.locator.locate(id).await? {
            ObjectLocation::Found(record) => return Ok(record),
            ObjectLocation::NotFound => NotFoundReason::Unknown,
            ObjectLocation::NotSupported => NotFoundReason::NotServed,
        };
        Err(ServeError::NotFound {
            object_id: id.clone(),
            reason,
        })
    }

    /// Stream the payload of `id`.
    ///
    /// A hit streams the cached file without any network I/O. A miss downloads the object first,
    /// see [`DownloadCoordinator::fetch`].
    pub async fn serve(&self, id: &ObjectId) -> Result<Asset, ServeError> {
        self.serve_range(id, None).await
    }

    /// Stream the part of the payload of `id` covered by `range`, or all of it.
    ///
    /// Every request is counted once in the cache access metrics: as a miss if it had to wait
    /// for a download, as a hit otherwise.
    pub async fn serve_range(
        &self,
        id: &ObjectId,
        range: Option<RangeRequest>,
    ) -> Result<Asset, ServeError> {
        let mut access = None;
        let result = self.open_asset(id, range, &mut access).await;
        match access {
            Some(CacheStatus::Hit) => self.metrics.hit.inc(1),
            Some(CacheStatus::Miss) => self.metrics.miss.inc(1),
            None => {}
        }
        result
    }

    async fn open_asset(
        &self,
        id: &ObjectId,
        range: Option<RangeRequest>,
        access: &mut Option<CacheStatus>,
    ) -> Result<Asset, ServeError> {
        let record = self.record(id).await?;
        let range = match range {
            None => None,
            Some(request) => Some(request.resolve(record.size_bytes).ok_or_else(|| {
                ServeError::RangeNotSatisfiable {
                    object_id: id.clone(),
                    size: record.size_bytes,
                }
            })?),
        };
        let storage_error = |source| ServeError::Storage {
            object_id: id.clone(),
            source,
        };

        for _ in 0..MAX_OPEN_ATTEMPTS {
            if let Some(entry) = self.cache().get(id) {
                match open_payload(&entry.location, range, None).await {
                    Ok(body) => {
                        let cache_status = *access.get_or_insert(CacheStatus::Hit);
                        debug!(object_id = %id, ?range, "cache hit");
                        return Ok(Asset {
                            size: entry.size_bytes,
                            content_type: entry.content_type,
                            cache_status,
                            range,
                            body,
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!(object_id = %id, "cached payload is missing, dropping entry");
                        self.cache().delete(id);
                    }
                    Err(source) => return Err(storage_error(source)),
                }
            }

            *access = Some(CacheStatus::Miss);
            debug!(object_id = %id, "cache miss");
            let payload = self.coordinator.fetch(&record).await.map_err(|e| match e {
                DownloadError::NoCandidates { object_id } => ServeError::NotFound {
                    object_id,
                    reason: NotFoundReason::NoAccessPoints,
                },
                e => ServeError::Download(e),
            })?;
            match asset_from_payload(payload, range).await {
                Ok(asset) => return Ok(asset),
                // evicted before it could be opened
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(object_id = %id, "downloaded payload was evicted, retrying");
                }
                Err(source) => return Err(storage_error(source)),
            }
        }

        Err(storage_error(io::Error::new(
            io::ErrorKind::NotFound,
            "payload evicted before it could be read",
        )))
    }

    /// What a request for `id` would find, without downloading anything or touching recency
    pub async fn head(&self, id: &ObjectId) -> Result<HeadStatus, ServeError> {
        let record = self.record(id).await?;
        if let Some(entry) = self.cache().peek(id) {
            return Ok(HeadStatus::Hit {
                size: entry.size_bytes,
                content_type: entry.content_type,
            });
        }
        if self.coordinator.is_in_flight(id) {
            return Ok(HeadStatus::Pending {
                size: record.size_bytes,
            });
        }
        if self.coordinator.resolver().resolve(&record).is_empty() {
            return Err(ServeError::NotFound {
                object_id: id.clone(),
                reason: NotFoundReason::NoAccessPoints,
            });
        }
        Ok(HeadStatus::Miss {
            size: record.size_bytes,
        })
    }

    /// Push the storage operators of the metadata source to the endpoint resolver
    pub async fn update_operators(&self) -> Result<(), ServeError> {
        let operators = self.locator.source().storage_operators().await?;
        debug!(operators = operators.len(), "updating storage operators");
        self.coordinator.resolver().set_operators(operators);
        Ok(())
    }

    /// Reload metadata: the served buckets and the storage operators
    pub async fn refresh_metadata(&self) -> Result<(), ServeError> {
        self.locator.refresh().await?;
        self.update_operators().await
    }

    /// Index the payloads left in the content directory by a previous run.
    ///
    /// Payloads of objects that are no longer served, unknown, of the wrong size or larger than
    /// the cache are deleted. The remaining ones are indexed with their modification time as
    /// access time, oldest first, so the most recently written survive when they don't all fit.
    /// Their content type is detected from the payload.
    /// Returns the number of indexed objects.
    pub async fn rebuild_index(&self) -> Result<usize, ServeError> {
        let mut stored = self.content_dir.scan().await?;
        stored.sort_by(|a, b| (a.modified, &a.object_id).cmp(&(b.modified, &b.object_id)));

        let mut indexed = 0;
        for object in stored {
            let id = &object.object_id;
            let reason = if !self.locator.is_supported(id) {
                Some("object is not served")
            } else {
                match self.locator.source().data_object(id).await? {
                    None => Some("object is unknown"),
                    Some(record) if record.size_bytes != object.size_bytes => {
                        Some("payload size does not match")
                    }
                    Some(_) if !self.cache().fits(object.size_bytes) => {
                        Some("payload exceeds cache capacity")
                    }
                    Some(_) => None,
                }
            };

            if let Some(reason) = reason {
                info!(object_id = %id, reason, "removing stored payload");
                remove_file(&object.path).await;
                continue;
            }

            let content_type = match self.content_dir.detect_content_type(id).await {
                Ok(content_type) => content_type,
                Err(error) => {
                    warn!(object_id = %id, %error, "failed to detect content type");
                    DEFAULT_CONTENT_TYPE.to_string()
                }
            };
            self.cache().insert(CacheEntry {
                object_id: object.object_id,
                size_bytes: object.size_bytes,
                location: object.path,
                content_type,
                created_at: object.modified,
                last_accessed_at: object.modified,
            });
            indexed += 1;
        }

        info!(
            indexed,
            size_bytes = self.cache().size(),
            "rebuilt cache index"
        );
        Ok(indexed)
    }

    /// Drop cached objects that are no longer served. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let mut removed = 0;
        for entry in self.cache().entries() {
            if !self.locator.is_supported(&entry.object_id) && self.cache().delete(&entry.object_id)
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed cached objects no longer served");
        }
        removed
    }
}

async fn remove_file(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), %error, "failed to remove stored payload");
    }
}

/// Open a payload file for streaming `range` of it, holding `keep_alive` until the stream is
/// dropped
async fn open_payload(
    path: &Path,
    range: Option<ByteRange>,
    keep_alive: Option<Arc<Payload>>,
) -> io::Result<BoxStream<'static, Result<Bytes, io::Error>>> {
    let mut file = tokio::fs::File::open(path).await?;
    let stream = match range {
        None => ReaderStream::with_capacity(file, READ_CHUNK_SIZE).boxed(),
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            ReaderStream::with_capacity(file.take(range.len()), READ_CHUNK_SIZE).boxed()
        }
    };
    Ok(match keep_alive {
        Some(payload) => stream
            .map(move |chunk| {
                let _payload = &payload;
                chunk
            })
            .boxed(),
        None => stream,
    })
}

async fn asset_from_payload(payload: Arc<Payload>, range: Option<ByteRange>) -> io::Result<Asset> {
    let body = match payload.as_ref() {
        Payload::Cached(entry) => open_payload(&entry.location, range, None).await?,
        Payload::Transient(file) => {
            open_payload(file.path(), range, Some(Arc::clone(&payload))).await?
        }
        Payload::Memory { bytes, .. } => {
            let bytes = match range {
                None => bytes.clone(),
                Some(range) => bytes.slice(range.start as usize..=range.end as usize),
            };
            futures::stream::iter([Ok(bytes)]).boxed()
        }
    };
    Ok(Asset {
        size: payload.size(),
        content_type: payload.content_type().to_string(),
        cache_status: CacheStatus::Miss,
        range,
        body,
    })
}

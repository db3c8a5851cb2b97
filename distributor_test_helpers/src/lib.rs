//! Helpers for testing the distributor crates: a scripted in-process origin and builders for
//! metadata fixtures.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use distributor_types::{
    AccessPoint, BucketId, ContentHash, DataObjectRecord, DistributionBucket, MetadataSnapshot,
    ObjectId, OperatorMetadata, OriginClient, OriginError, OriginResponse, StorageOperator,
    WorkerId,
};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

/// The distribution bucket that [`snapshot`] assigns every object to
pub const DISTRIBUTION_BUCKET: &str = "1:0";

/// The worker that operates [`DISTRIBUTION_BUCKET`]
pub const DISTRIBUTION_WORKER: u64 = 1;

/// How a [`MockOrigin`] answers requests for a URL
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Respond with `body`, delivered in chunks of `chunk_size` bytes
    Serve {
        body: Bytes,
        content_type: Option<String>,
        chunk_size: usize,
    },
    /// Respond with a non-success status code
    Status(u16),
    /// Fail before a response is received, like a refused connection
    Refuse,
    /// Never respond
    Hang,
    /// Send the first chunk of `body`, then stall forever
    Stall { body: Bytes },
    /// Wait until the gate is notified, then serve `body`
    Gated { gate: Arc<Notify>, body: Bytes },
}

/// An [`OriginClient`] that answers from a per-URL script and counts the requests it receives.
///
/// Requests to URLs without a script behave like [`Behaviour::Refuse`].
#[derive(Debug, Default)]
pub struct MockOrigin {
    behaviours: Mutex<HashMap<Url, Behaviour>>,
    requests: Mutex<HashMap<Url, usize>>,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: Url, behaviour: Behaviour) {
        self.behaviours.lock().insert(url, behaviour);
    }

    /// Serve `body` from `url` in 4 KiB chunks without a content type
    pub fn serve(&self, url: Url, body: impl Into<Bytes>) {
        self.set(
            url,
            Behaviour::Serve {
                body: body.into(),
                content_type: None,
                chunk_size: 4096,
            },
        );
    }

    /// Serve `body` from `url` once the returned gate is notified
    pub fn gated(&self, url: Url, body: impl Into<Bytes>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.set(
            url,
            Behaviour::Gated {
                gate: Arc::clone(&gate),
                body: body.into(),
            },
        );
        gate
    }

    /// Number of requests received for `url`
    pub fn request_count(&self, url: &Url) -> usize {
        self.requests.lock().get(url).copied().unwrap_or_default()
    }

    /// Number of requests received for any URL
    pub fn total_request_count(&self) -> usize {
        self.requests.lock().values().sum()
    }
}

fn chunked(body: Bytes, chunk_size: usize) -> Vec<Result<Bytes, OriginError>> {
    let chunk_size = chunk_size.max(1);
    (0..body.len())
        .step_by(chunk_size)
        .map(|start| Ok(body.slice(start..(start + chunk_size).min(body.len()))))
        .collect()
}

#[async_trait]
impl OriginClient for MockOrigin {
    async fn get(&self, url: &Url) -> Result<OriginResponse, OriginError> {
        *self.requests.lock().entry(url.clone()).or_default() += 1;
        let behaviour = self.behaviours.lock().get(url).cloned();
        match behaviour {
            None | Some(Behaviour::Refuse) => Err(OriginError::Request {
                url: url.clone(),
                message: "connection refused".to_string(),
            }),
            Some(Behaviour::Status(status)) => Err(OriginError::Status {
                url: url.clone(),
                status,
            }),
            Some(Behaviour::Hang) => std::future::pending().await,
            Some(Behaviour::Serve {
                body,
                content_type,
                chunk_size,
            }) => Ok(OriginResponse {
                content_type,
                body: stream::iter(chunked(body, chunk_size)).boxed(),
            }),
            Some(Behaviour::Stall { body }) => Ok(OriginResponse {
                content_type: None,
                body: stream::iter(chunked(body, 1).into_iter().take(1))
                    .chain(stream::pending())
                    .boxed(),
            }),
            Some(Behaviour::Gated { gate, body }) => {
                gate.notified().await;
                Ok(OriginResponse {
                    content_type: None,
                    body: stream::iter(chunked(body, 4096)).boxed(),
                })
            }
        }
    }
}

pub fn object_id(id: &str) -> ObjectId {
    id.parse().expect("valid object id")
}

/// Base URL of the `n`th fake storage node
pub fn endpoint(n: usize) -> Url {
    format!("http://storage-{n}.test:3333/")
        .parse()
        .expect("valid endpoint url")
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

/// A record for `payload` stored on `endpoints`, one storage bucket `0:<n>` per endpoint
pub fn record(id: &str, payload: &[u8], endpoints: &[Url]) -> DataObjectRecord {
    DataObjectRecord {
        object_id: object_id(id),
        size_bytes: payload.len() as u64,
        content_hash: ContentHash::of(payload),
        access_points: endpoints
            .iter()
            .enumerate()
            .map(|(n, endpoint)| AccessPoint {
                bucket_id: bucket_id(&format!("0:{n}")),
                endpoint: endpoint.clone(),
            })
            .collect(),
    }
}

/// URL the `index`th access point of `record` serves the object at
pub fn object_url(record: &DataObjectRecord, index: usize) -> Url {
    record.access_points[index]
        .object_url(&record.object_id)
        .expect("valid object url")
}

pub fn bucket_id(id: &str) -> BucketId {
    id.parse().expect("valid bucket id")
}

/// A snapshot holding `records`, all assigned to [`DISTRIBUTION_BUCKET`], with one storage
/// operator per distinct access point bucket
pub fn snapshot(records: &[DataObjectRecord]) -> MetadataSnapshot {
    let mut storage_operators: Vec<StorageOperator> = vec![];
    for access_point in records.iter().flat_map(|r| &r.access_points) {
        if storage_operators
            .iter()
            .any(|o| o.bucket_id == access_point.bucket_id)
        {
            continue;
        }
        storage_operators.push(StorageOperator {
            bucket_id: access_point.bucket_id.clone(),
            metadata: OperatorMetadata {
                endpoint: access_point.endpoint.clone(),
                family_id: None,
                location: None,
                latency_test_targets: vec![],
                declared_latency_ms: None,
            },
        });
    }
    MetadataSnapshot {
        data_objects: records.to_vec(),
        distribution_buckets: vec![DistributionBucket {
            bucket_id: bucket_id(DISTRIBUTION_BUCKET),
            operator_worker_ids: vec![WorkerId::new(DISTRIBUTION_WORKER)],
            object_ids: records.iter().map(|r| r.object_id.clone()).collect(),
        }],
        storage_operators,
    }
}

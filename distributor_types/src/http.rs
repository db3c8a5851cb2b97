//! Request and response bodies of the distributor HTTP API
use serde::{Deserialize, Serialize};

use crate::{BucketId, ObjectId, WorkerId};

/// Response body of `GET /api/v1/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: String,
    pub objects_in_cache: usize,
    pub storage_limit: u64,
    pub storage_used: u64,
    /// Seconds since the node started
    pub uptime: u64,
    pub downloads_in_progress: usize,
}

/// Response body of `GET /api/v1/buckets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketsResponse {
    pub buckets: Vec<BucketObjects>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_by_worker_id: Option<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketObjects {
    pub bucket_id: BucketId,
    pub object_ids: Vec<ObjectId>,
}

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

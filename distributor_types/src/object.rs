use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::{BucketId, MetadataValidationError, ObjectId, OperatorMetadata, WorkerId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid content hash {hash:?}: expected 64 hex characters")]
pub struct InvalidContentHash {
    hash: String,
}

/// SHA-256 digest of an object's payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a complete payload held in memory
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl FromStr for ContentHash {
    type Err = InvalidContentHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidContentHash {
            hash: s.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidContentHash;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Incrementally computes a [`ContentHash`] over a payload that arrives in chunks
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    digest: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.digest.update(chunk);
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash(self.digest.finalize().into())
    }
}

/// One concrete location an object may be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPoint {
    pub bucket_id: BucketId,
    pub endpoint: Url,
}

impl AccessPoint {
    /// URL of `object_id` on this access point's storage node:
    /// `<endpoint>/api/v1/files/<objectId>`
    pub fn object_url(&self, object_id: &ObjectId) -> Result<Url, url::ParseError> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!("api/v1/files/{object_id}"))
    }
}

/// Metadata describing a data object, read from the metadata source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataObjectRecord {
    pub object_id: ObjectId,
    pub size_bytes: u64,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub access_points: Vec<AccessPoint>,
}

/// A distribution bucket and the objects assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
    pub bucket_id: BucketId,
    #[serde(default)]
    pub operator_worker_ids: Vec<WorkerId>,
    #[serde(default)]
    pub object_ids: Vec<ObjectId>,
}

/// The operator serving a storage bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOperator {
    pub bucket_id: BucketId,
    pub metadata: OperatorMetadata,
}

/// Everything the distributor reads from its metadata source, as stored in a snapshot file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub data_objects: Vec<DataObjectRecord>,
    #[serde(default)]
    pub distribution_buckets: Vec<DistributionBucket>,
    #[serde(default)]
    pub storage_operators: Vec<StorageOperator>,
}

impl MetadataSnapshot {
    pub fn validate(&self) -> Result<(), MetadataValidationError> {
        for operator in &self.storage_operators {
            operator.metadata.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn incremental_hash_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), ContentHash::of(b"hello world"));
        assert_eq!(
            ContentHash::of(b"hello world").to_string(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn parse_content_hash() {
        let hash: ContentHash = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
            .parse()
            .unwrap();
        assert_eq!(hash, ContentHash::of(b"hello world"));
        "b94d27".parse::<ContentHash>().unwrap_err();
        "zz".repeat(32).parse::<ContentHash>().unwrap_err();
    }

    #[test]
    fn object_url_appends_files_path() {
        let id: ObjectId = "42".parse().unwrap();
        let with_path = AccessPoint {
            bucket_id: "0:1".parse().unwrap(),
            endpoint: "https://storage.example.com/storage".parse().unwrap(),
        };
        assert_eq!(
            with_path.object_url(&id).unwrap().as_str(),
            "https://storage.example.com/storage/api/v1/files/42"
        );
        let bare = AccessPoint {
            bucket_id: "0:1".parse().unwrap(),
            endpoint: "http://10.0.0.1:3333".parse().unwrap(),
        };
        assert_eq!(
            bare.object_url(&id).unwrap().as_str(),
            "http://10.0.0.1:3333/api/v1/files/42"
        );
    }

    #[test]
    fn parse_snapshot() {
        let snapshot: MetadataSnapshot = serde_json::from_str(
            r#"{
                "dataObjects": [{
                    "objectId": "1",
                    "sizeBytes": 11,
                    "contentHash": "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
                    "accessPoints": [{"bucketId": "0:0", "endpoint": "http://storage-0:3333"}]
                }],
                "distributionBuckets": [{"bucketId": "0:0", "operatorWorkerIds": [1], "objectIds": ["1"]}],
                "storageOperators": [{"bucketId": "0:0", "metadata": {"endpoint": "http://storage-0:3333"}}]
            }"#,
        )
        .unwrap();
        snapshot.validate().unwrap();
        assert_eq!(snapshot.data_objects[0].size_bytes, 11);
        assert_eq!(
            snapshot.distribution_buckets[0].operator_worker_ids,
            vec![WorkerId::new(1)]
        );
    }
}

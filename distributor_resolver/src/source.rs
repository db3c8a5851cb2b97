use std::{fmt::Debug, path::PathBuf};

use async_trait::async_trait;
use distributor_types::{
    DataObjectRecord, DistributionBucket, MetadataValidationError, ObjectId, StorageOperator,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read metadata from {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid metadata: {0}")]
    Invalid(#[from] MetadataValidationError),

    #[error("metadata source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the metadata describing objects, buckets and storage operators
#[async_trait]
pub trait MetadataSource: Debug + Send + Sync + 'static {
    /// Look up a data object, `None` if it does not exist
    async fn data_object(&self, id: &ObjectId) -> Result<Option<DataObjectRecord>, MetadataError>;

    async fn distribution_buckets(&self) -> Result<Vec<DistributionBucket>, MetadataError>;

    async fn storage_operators(&self) -> Result<Vec<StorageOperator>, MetadataError>;

    /// Pick up changes from the underlying store
    async fn refresh(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

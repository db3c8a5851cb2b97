use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use distributor_types::{
    DataObjectRecord, DistributionBucket, MetadataSnapshot, ObjectId, StorageOperator,
};
use observability_deps::tracing::info;
use parking_lot::RwLock;

use crate::{MetadataError, MetadataSource};

/// A [`MetadataSource`] backed by a JSON [`MetadataSnapshot`] file.
///
/// [`refresh`][MetadataSource::refresh] re-reads the file; if the new contents fail to parse or
/// validate the previous snapshot stays in place.
#[derive(Debug)]
pub struct SnapshotMetadataSource {
    path: Option<PathBuf>,
    current: RwLock<Arc<IndexedSnapshot>>,
}

#[derive(Debug)]
struct IndexedSnapshot {
    objects: HashMap<ObjectId, DataObjectRecord>,
    distribution_buckets: Vec<DistributionBucket>,
    storage_operators: Vec<StorageOperator>,
}

impl IndexedSnapshot {
    fn new(snapshot: MetadataSnapshot) -> Result<Self, MetadataError> {
        snapshot.validate()?;
        let MetadataSnapshot {
            data_objects,
            distribution_buckets,
            storage_operators,
        } = snapshot;
        Ok(Self {
            objects: data_objects
                .into_iter()
                .map(|r| (r.object_id.clone(), r))
                .collect(),
            distribution_buckets,
            storage_operators,
        })
    }
}

async fn read_snapshot(path: &Path) -> Result<MetadataSnapshot, MetadataError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| MetadataError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl SnapshotMetadataSource {
    /// Load and validate the snapshot stored at `path`
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        let snapshot = IndexedSnapshot::new(read_snapshot(&path).await?)?;
        info!(
            path = %path.display(),
            objects = snapshot.objects.len(),
            buckets = snapshot.distribution_buckets.len(),
            operators = snapshot.storage_operators.len(),
            "loaded metadata snapshot"
        );
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Serve a fixed, in-memory snapshot
    pub fn from_snapshot(snapshot: MetadataSnapshot) -> Result<Self, MetadataError> {
        Ok(Self {
            path: None,
            current: RwLock::new(Arc::new(IndexedSnapshot::new(snapshot)?)),
        })
    }

    /// Swap in a new snapshot
    pub fn replace(&self, snapshot: MetadataSnapshot) -> Result<(), MetadataError> {
        *self.current.write() = Arc::new(IndexedSnapshot::new(snapshot)?);
        Ok(())
    }

    fn current(&self) -> Arc<IndexedSnapshot> {
        Arc::clone(&self.current.read())
    }
}

#[async_trait]
impl MetadataSource for SnapshotMetadataSource {
    async fn data_object(&self, id: &ObjectId) -> Result<Option<DataObjectRecord>, MetadataError> {
        Ok(self.current().objects.get(id).cloned())
    }

    async fn distribution_buckets(&self) -> Result<Vec<DistributionBucket>, MetadataError> {
        Ok(self.current().distribution_buckets.clone())
    }

    async fn storage_operators(&self) -> Result<Vec<StorageOperator>, MetadataError> {
        Ok(self.current().storage_operators.clone())
    }

    async fn refresh(&self) -> Result<(), MetadataError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        self.replace(read_snapshot(path).await?)
    }
}

use std::{collections::HashSet, sync::Arc};

use distributor_types::{BucketId, DataObjectRecord, DistributionBucket, ObjectId, WorkerId};
use observability_deps::tracing::{debug, info};
use parking_lot::RwLock;

use crate::{MetadataError, MetadataSource};

/// Which distribution buckets this node serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketSelection {
    /// An explicit list of buckets
    Ids(Vec<BucketId>),
    /// Every bucket operated by the given worker
    AllByWorkerId(WorkerId),
}

impl BucketSelection {
    fn selects(&self, bucket: &DistributionBucket) -> bool {
        match self {
            Self::Ids(ids) => ids.contains(&bucket.bucket_id),
            Self::AllByWorkerId(worker) => bucket.operator_worker_ids.contains(worker),
        }
    }
}

/// The distribution buckets currently served and the union of their objects
#[derive(Debug, Default)]
pub struct ServedBuckets {
    pub buckets: Vec<DistributionBucket>,
    objects: HashSet<ObjectId>,
}

impl ServedBuckets {
    fn new(selection: &BucketSelection, all: Vec<DistributionBucket>) -> Self {
        let buckets: Vec<_> = all.into_iter().filter(|b| selection.selects(b)).collect();
        let objects = buckets
            .iter()
            .flat_map(|b| b.object_ids.iter().cloned())
            .collect();
        Self { buckets, objects }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// Outcome of [`ObjectLocator::locate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocation {
    /// The object does not exist
    NotFound,
    /// The object exists but is not in any bucket this node serves
    NotSupported,
    Found(DataObjectRecord),
}

/// Decides whether objects exist and are hosted by this node's distribution buckets
#[derive(Debug)]
pub struct ObjectLocator {
    source: Arc<dyn MetadataSource>,
    selection: BucketSelection,
    served: RwLock<Arc<ServedBuckets>>,
}

impl ObjectLocator {
    /// Create a locator and load the set of served buckets from `source`
    pub async fn new(
        source: Arc<dyn MetadataSource>,
        selection: BucketSelection,
    ) -> Result<Self, MetadataError> {
        let locator = Self {
            source,
            selection,
            served: Default::default(),
        };
        locator.reload_buckets().await?;
        Ok(locator)
    }

    pub fn selection(&self) -> &BucketSelection {
        &self.selection
    }

    pub fn source(&self) -> &Arc<dyn MetadataSource> {
        &self.source
    }

    pub fn served_buckets(&self) -> Arc<ServedBuckets> {
        Arc::clone(&self.served.read())
    }

    /// Whether `id` belongs to one of the served buckets
    pub fn is_supported(&self, id: &ObjectId) -> bool {
        self.served.read().contains(id)
    }

    /// Refresh the metadata source, then reload the served buckets
    pub async fn refresh(&self) -> Result<(), MetadataError> {
        self.source.refresh().await?;
        self.reload_buckets().await
    }

    async fn reload_buckets(&self) -> Result<(), MetadataError> {
        let all = self.source.distribution_buckets().await?;
        let served = ServedBuckets::new(&self.selection, all);
        info!(
            buckets = served.buckets.len(),
            objects = served.object_count(),
            "serving distribution buckets"
        );
        *self.served.write() = Arc::new(served);
        Ok(())
    }

    pub async fn locate(&self, id: &ObjectId) -> Result<ObjectLocation, MetadataError> {
        let Some(record) = self.source.data_object(id).await? else {
            debug!(object_id = %id, "object not found");
            return Ok(ObjectLocation::NotFound);
        };
        if !self.is_supported(id) {
            debug!(object_id = %id, "object not in a served bucket");
            return Ok(ObjectLocation::NotSupported);
        }
        Ok(ObjectLocation::Found(record))
    }
}

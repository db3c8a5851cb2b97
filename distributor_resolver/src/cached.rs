use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use distributor_types::{DataObjectRecord, DistributionBucket, ObjectId, StorageOperator};
use iox_time::{Time, TimeProvider};
use parking_lot::Mutex;

use crate::{MetadataError, MetadataSource};

/// Caches per-object lookups of another [`MetadataSource`] for a fixed time-to-live.
///
/// Only objects the inner source knows are cached. Lookups of unknown ids always reach the inner
/// source, so requests for arbitrary ids can't grow the cache beyond the size of the metadata.
#[derive(Debug)]
pub struct CachedMetadataSource {
    inner: Arc<dyn MetadataSource>,
    ttl: Duration,
    time_provider: Arc<dyn TimeProvider>,
    objects: Mutex<HashMap<ObjectId, (Time, DataObjectRecord)>>,
}

impl CachedMetadataSource {
    pub fn new(
        inner: Arc<dyn MetadataSource>,
        ttl: Duration,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            inner,
            ttl,
            time_provider,
            objects: Default::default(),
        }
    }

    fn cached(&self, id: &ObjectId) -> Option<DataObjectRecord> {
        let now = self.time_provider.now();
        let objects = self.objects.lock();
        let (fetched_at, record) = objects.get(id)?;
        let age = now.checked_duration_since(*fetched_at)?;
        (age < self.ttl).then(|| record.clone())
    }
}

#[async_trait]
impl MetadataSource for CachedMetadataSource {
    async fn data_object(&self, id: &ObjectId) -> Result<Option<DataObjectRecord>, MetadataError> {
        if let Some(record) = self.cached(id) {
            return Ok(Some(record));
        }
        let record = self.inner.data_object(id).await?;
        if let Some(record) = &record {
            self.objects
                .lock()
                .insert(id.clone(), (self.time_provider.now(), record.clone()));
        }
        Ok(record)
    }

    async fn distribution_buckets(&self) -> Result<Vec<DistributionBucket>, MetadataError> {
        self.inner.distribution_buckets().await
    }

    async fn storage_operators(&self) -> Result<Vec<StorageOperator>, MetadataError> {
        self.inner.storage_operators().await
    }

    async fn refresh(&self) -> Result<(), MetadataError> {
        self.inner.refresh().await?;
        // drop entries that expired since they were fetched
        let now = self.time_provider.now();
        self.objects.lock().retain(|_, (fetched_at, _)| {
            now.checked_duration_since(*fetched_at)
                .is_some_and(|age| age < self.ttl)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::SnapshotMetadataSource;
    use distributor_test_helpers::{endpoint, object_id, record, snapshot};
    use iox_time::MockProvider;
    use pretty_assertions::assert_eq;

    /// Counts lookups that reach the wrapped source
    #[derive(Debug)]
    struct CountingSource {
        inner: SnapshotMetadataSource,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn data_object(
            &self,
            id: &ObjectId,
        ) -> Result<Option<DataObjectRecord>, MetadataError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.data_object(id).await
        }

        async fn distribution_buckets(&self) -> Result<Vec<DistributionBucket>, MetadataError> {
            self.inner.distribution_buckets().await
        }

        async fn storage_operators(&self) -> Result<Vec<StorageOperator>, MetadataError> {
            self.inner.storage_operators().await
        }
    }

    #[tokio::test]
    async fn lookups_are_cached_until_ttl_expires() {
        let counting = Arc::new(CountingSource {
            inner: SnapshotMetadataSource::from_snapshot(snapshot(&[record(
                "1",
                b"one",
                &[endpoint(0)],
            )]))
            .unwrap(),
            lookups: AtomicUsize::new(0),
        });
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let cached = CachedMetadataSource::new(
            Arc::clone(&counting) as _,
            Duration::from_secs(60),
            Arc::clone(&time_provider) as _,
        );

        let id = object_id("1");
        assert!(cached.data_object(&id).await.unwrap().is_some());
        assert!(cached.data_object(&id).await.unwrap().is_some());
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 1);

        time_provider.inc(Duration::from_secs(59));
        cached.data_object(&id).await.unwrap();
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 1);

        time_provider.inc(Duration::from_secs(1));
        cached.data_object(&id).await.unwrap();
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_cached() {
        let counting = Arc::new(CountingSource {
            inner: SnapshotMetadataSource::from_snapshot(snapshot(&[])).unwrap(),
            lookups: AtomicUsize::new(0),
        });
        let cached = CachedMetadataSource::new(
            Arc::clone(&counting) as _,
            Duration::from_secs(60),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))) as _,
        );

        for n in 0..100 {
            let id = object_id(&format!("random-{n}"));
            assert!(cached.data_object(&id).await.unwrap().is_none());
        }
        assert!(cached.data_object(&object_id("random-0")).await.unwrap().is_none());
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 101);
        assert!(cached.objects.lock().is_empty());
    }
}

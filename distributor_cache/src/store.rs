use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use distributor_types::ObjectId;
use iox_time::{Time, TimeProvider};
use metric::Registry;
use observability_deps::tracing::{debug, error};
use parking_lot::Mutex;

use crate::metrics::CacheMetrics;

/// An object held by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub object_id: ObjectId,
    pub size_bytes: u64,
    /// Where the payload is stored
    pub location: PathBuf,
    pub content_type: String,
    pub created_at: Time,
    pub last_accessed_at: Time,
}

impl CacheEntry {
    fn recency_key(&self) -> (i64, ObjectId) {
        (
            self.last_accessed_at.timestamp_nanos(),
            self.object_id.clone(),
        )
    }
}

/// The index and the recency order of its entries; only mutated under the store's lock
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ObjectId, CacheEntry>,
    /// Entries ordered from least to most recently accessed, ties broken by object id
    recency: BTreeSet<(i64, ObjectId)>,
    used: u64,
}

impl CacheState {
    /// Insert `entry`, returning the entry it replaced
    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let replaced = self.remove(&entry.object_id);
        self.used += entry.size_bytes;
        self.recency.insert(entry.recency_key());
        self.entries.insert(entry.object_id.clone(), entry);
        replaced
    }

    fn remove(&mut self, id: &ObjectId) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.recency.remove(&entry.recency_key());
        self.used -= entry.size_bytes;
        Some(entry)
    }

    fn touch(&mut self, id: &ObjectId, now: Time) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(id)?;
        self.recency.remove(&entry.recency_key());
        entry.last_accessed_at = now;
        self.recency.insert(entry.recency_key());
        Some(entry.clone())
    }

    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, id) = self.recency.first()?.clone();
        self.remove(&id)
    }
}

/// A capacity-bounded index of cached payloads with least-recently-used eviction.
///
/// The total size of all entries never exceeds the capacity once a call returns: every insert
/// evicts the least recently accessed entries (oldest access first, ties broken by object id)
/// until the total fits. The payload file of a removed entry is deleted before the call returns.
/// If deleting the file fails the entry is still removed from the index, leaving an orphaned file
/// rather than an entry pointing at nothing.
///
/// All mutations of the index happen under a single lock. Payload files are deleted after the
/// lock is released.
#[derive(Debug)]
pub struct CacheStore {
    capacity: u64,
    time_provider: Arc<dyn TimeProvider>,
    state: Mutex<CacheState>,
    metrics: CacheMetrics,
}

impl CacheStore {
    pub fn new(
        capacity: u64,
        time_provider: Arc<dyn TimeProvider>,
        metric_registry: &Registry,
    ) -> Self {
        Self {
            capacity,
            time_provider,
            state: Default::default(),
            metrics: CacheMetrics::new(metric_registry),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether an object of `size_bytes` can be held at all
    pub fn fits(&self, size_bytes: u64) -> bool {
        size_bytes <= self.capacity
    }

    /// Total bytes currently cached
    pub fn size(&self) -> u64 {
        self.state.lock().used
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get an entry and mark it as accessed now
    pub fn get(&self, id: &ObjectId) -> Option<CacheEntry> {
        let now = self.time_provider.now();
        self.state.lock().touch(id, now)
    }

    /// Get an entry without changing its recency
    pub fn peek(&self, id: &ObjectId) -> Option<CacheEntry> {
        self.state.lock().entries.get(id).cloned()
    }

    /// Whether an entry exists, without changing its recency
    pub fn has(&self, id: &ObjectId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Insert or overwrite the entry for `id`, accessed now, then evict until the store fits its
    /// capacity. Returns the evicted object ids.
    ///
    /// An object larger than the capacity evicts everything, itself included; callers should
    /// check [`fits`][Self::fits] first.
    pub fn put(
        &self,
        id: ObjectId,
        size_bytes: u64,
        location: PathBuf,
        content_type: impl Into<String>,
    ) -> Vec<ObjectId> {
        let now = self.time_provider.now();
        self.insert(CacheEntry {
            object_id: id,
            size_bytes,
            location,
            content_type: content_type.into(),
            created_at: now,
            last_accessed_at: now,
        })
    }

    /// Insert an entry with its timestamps as given, e.g. when rebuilding the index from disk.
    /// Evicts like [`put`][Self::put].
    pub fn insert(&self, entry: CacheEntry) -> Vec<ObjectId> {
        let id = entry.object_id.clone();
        let size_bytes = entry.size_bytes;
        let location = entry.location.clone();

        let (replaced, evicted) = {
            let mut state = self.state.lock();
            let replaced = state
                .insert(entry)
                .filter(|replaced| replaced.location != location);
            debug!(object_id = %id, size_bytes, used = state.used, "cached object");

            let mut evicted = vec![];
            while state.used > self.capacity {
                let Some(oldest) = state.pop_oldest() else {
                    break;
                };
                debug!(
                    object_id = %oldest.object_id,
                    size_bytes = oldest.size_bytes,
                    "evicting least recently used object"
                );
                evicted.push(oldest);
            }
            self.metrics.record_evictions(evicted.len());
            self.metrics.record_usage(state.used, state.entries.len());
            (replaced, evicted)
        };

        for entry in replaced.iter().chain(&evicted) {
            release(entry);
        }
        evicted.into_iter().map(|e| e.object_id).collect()
    }

    /// Remove the entry for `id` and delete its payload. Returns whether an entry existed.
    pub fn delete(&self, id: &ObjectId) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let Some(entry) = state.remove(id) else {
                return false;
            };
            self.metrics.record_usage(state.used, state.entries.len());
            entry
        };
        release(&entry);
        debug!(object_id = %id, "deleted cached object");
        true
    }

    /// Snapshot of all entries, least recently accessed first
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock();
        state
            .recency
            .iter()
            .filter_map(|(_, id)| state.entries.get(id).cloned())
            .collect()
    }
}

/// Delete the payload of an entry that left the index
fn release(entry: &CacheEntry) {
    if let Err(error) = remove_payload(&entry.location) {
        error!(
            object_id = %entry.object_id,
            location = %entry.location.display(),
            %error,
            "failed to delete cached payload"
        );
    }
}

fn remove_payload(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        r => r,
    }
}

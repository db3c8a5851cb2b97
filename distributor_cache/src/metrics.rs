use metric::{Metric, Registry, U64Counter, U64Gauge};

pub(crate) const CACHE_SIZE_BYTES_NAME: &str = "distributor_cache_size_bytes";
const CACHE_SIZE_BYTES_DESCRIPTION: &str = "size of the payloads held in the cache in bytes";

pub(crate) const CACHE_ENTRIES_NAME: &str = "distributor_cache_entries";
const CACHE_ENTRIES_DESCRIPTION: &str = "number of objects held in the cache";

pub(crate) const CACHE_EVICTIONS_NAME: &str = "distributor_cache_evictions";
const CACHE_EVICTIONS_DESCRIPTION: &str =
    "objects removed from the cache to stay within its capacity";

#[derive(Debug)]
pub(crate) struct CacheMetrics {
    size_bytes: U64Gauge,
    entries: U64Gauge,
    evictions: U64Counter,
}

impl CacheMetrics {
    pub(crate) fn new(registry: &Registry) -> Self {
        let size_bytes: Metric<U64Gauge> =
            registry.register_metric(CACHE_SIZE_BYTES_NAME, CACHE_SIZE_BYTES_DESCRIPTION);
        let entries: Metric<U64Gauge> =
            registry.register_metric(CACHE_ENTRIES_NAME, CACHE_ENTRIES_DESCRIPTION);
        let evictions: Metric<U64Counter> =
            registry.register_metric(CACHE_EVICTIONS_NAME, CACHE_EVICTIONS_DESCRIPTION);
        Self {
            size_bytes: size_bytes.recorder([]),
            entries: entries.recorder([]),
            evictions: evictions.recorder([]),
        }
    }

    pub(crate) fn record_usage(&self, used_bytes: u64, entries: usize) {
        self.size_bytes.set(used_bytes);
        self.entries.set(entries as u64);
    }

    pub(crate) fn record_evictions(&self, n: usize) {
        self.evictions.inc(n as u64);
    }
}

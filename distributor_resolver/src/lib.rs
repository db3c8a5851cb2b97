//! Resolution of objects to the origin endpoints that hold them.
//!
//! * [`MetadataSource`] is the read-only view of bucket, operator and object metadata. The node
//!   ships with [`SnapshotMetadataSource`], optionally wrapped in a [`CachedMetadataSource`].
//! * [`ObjectLocator`] decides whether an object exists and is served by this node.
//! * [`EndpointResolver`] turns an object's access points into a ranked list of candidate URLs,
//!   using operator metadata and the latencies recorded by the [`LatencyProber`].

mod cached;
mod endpoint;
mod latency;
mod locator;
mod snapshot;
mod source;

pub use cached::CachedMetadataSource;
pub use endpoint::EndpointResolver;
pub use latency::{LatencyProber, LatencyTracker, ProbeTarget};
pub use locator::{BucketSelection, ObjectLocation, ObjectLocator, ServedBuckets};
pub use snapshot::SnapshotMetadataSource;
pub use source::{MetadataError, MetadataSource};

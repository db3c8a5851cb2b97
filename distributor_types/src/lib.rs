//! Types shared by the crates of the distributor node: object identity, content hashes, metadata
//! records and the JSON bodies of the HTTP API.

mod content_type;
pub mod http;
mod id;
mod metadata;
mod object;
mod origin;

pub use content_type::{CONTENT_SNIFF_LEN, resolve_content_type, sniff_content_type};
pub use id::{BucketId, FamilyId, InvalidId, ObjectId, WorkerId};
pub use metadata::{
    Continent, Coordinates, FamilyMetadata, GeoArea, MetadataValidationError, NodeLocation,
    OperatorMetadata,
};
pub use object::{
    AccessPoint, ContentHash, ContentHasher, DataObjectRecord, DistributionBucket,
    InvalidContentHash, MetadataSnapshot, StorageOperator,
};
pub use origin::{OriginClient, OriginError, OriginResponse};

/// Content type reported for payloads whose origin did not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

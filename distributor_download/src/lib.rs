//! Fetching objects from origin storage nodes.
//!
//! The [`DownloadCoordinator`] runs at most one download per object, trying the candidate
//! endpoints of the object one after the other until one delivers a payload matching the
//! declared size and content hash. Verified payloads are moved into the cache; callers that asked
//! for the object while it was downloading share the result.

mod coordinator;
mod error;
mod http;
mod metrics;
mod payload;

pub use coordinator::{DownloadConfig, DownloadCoordinator};
pub use error::{AttemptError, AttemptFailure, DownloadError, IntegrityError};
pub use http::HttpOriginClient;
pub use payload::{Payload, TransientFile};

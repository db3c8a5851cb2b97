use std::time::Duration;

use distributor_types::{ContentHash, ObjectId, OriginError};
use thiserror::Error;
use url::Url;

/// The payload an origin delivered does not match the object's record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("origin sent more than the expected {expected} bytes")]
    SizeExceeded { expected: u64 },
}

/// Why a single candidate failed to deliver the object
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("source unavailable: {0}")]
    Unavailable(#[from] OriginError),

    #[error("no progress within {0:?}")]
    Timeout(Duration),

    #[error("integrity check failed: {0}")]
    IntegrityMismatch(#[from] IntegrityError),

    #[error("failed to spool payload: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub url: Url,
    pub error: AttemptError,
}

#[derive(Debug, Error, Clone)]
pub enum DownloadError {
    #[error("object {object_id} has no access points")]
    NoCandidates { object_id: ObjectId },

    #[error(
        "no viable source for object {object_id} after {} attempts",
        attempts.len()
    )]
    NoViableSource {
        object_id: ObjectId,
        attempts: Vec<AttemptFailure>,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("download task failed: {0}")]
    TaskFailed(String),
}

impl DownloadError {
    /// Whether every source was given up on because it stopped responding
    pub fn all_timed_out(&self) -> bool {
        match self {
            Self::NoViableSource { attempts, .. } => {
                !attempts.is_empty()
                    && attempts
                        .iter()
                        .all(|a| matches!(a.error, AttemptError::Timeout(_)))
            }
            _ => false,
        }
    }
}

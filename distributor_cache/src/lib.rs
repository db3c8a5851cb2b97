//! The local payload cache of the distributor node.
//!
//! [`CacheStore`] is the capacity-bounded index of cached objects, evicting the least recently
//! accessed entries. [`ContentDir`] owns the on-disk layout of payload files the index points at.

mod content_dir;
mod metrics;
mod store;

pub use content_dir::{ContentDir, StoredObject};
pub use store::{CacheEntry, CacheStore};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create content directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to scan content directory {path:?}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}

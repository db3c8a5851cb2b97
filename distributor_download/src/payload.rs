use std::path::{Path, PathBuf};

use bytes::Bytes;
use distributor_cache::CacheEntry;
use observability_deps::tracing::warn;

/// A verified object, shared by every caller of the download that produced it
#[derive(Debug)]
pub enum Payload {
    /// Held by the cache
    Cached(CacheEntry),
    /// Held in memory because it could not be spooled to disk
    Memory { bytes: Bytes, content_type: String },
    /// Too large for the cache, held in a file removed once the payload is dropped
    Transient(TransientFile),
}

impl Payload {
    pub fn size(&self) -> u64 {
        match self {
            Self::Cached(entry) => entry.size_bytes,
            Self::Memory { bytes, .. } => bytes.len() as u64,
            Self::Transient(file) => file.size_bytes,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Cached(entry) => &entry.content_type,
            Self::Memory { content_type, .. } => content_type,
            Self::Transient(file) => &file.content_type,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    size_bytes: u64,
    content_type: String,
}

impl TransientFile {
    pub(crate) fn new(path: PathBuf, size_bytes: u64, content_type: String) -> Self {
        Self {
            path,
            size_bytes,
            content_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error, "failed to remove transient payload");
            }
        }
    }
}

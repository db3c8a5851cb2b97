use std::{
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use distributor_types::{CONTENT_SNIFF_LEN, DEFAULT_CONTENT_TYPE, ObjectId, sniff_content_type};
use iox_time::Time;
use observability_deps::tracing::{debug, info, warn};
use tokio::io::AsyncReadExt;

use crate::CacheError;

/// Extension of in-progress downloads; object ids never contain a `.`
const PARTIAL_EXTENSION: &str = ".partial";

/// A payload file found in the content directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub object_id: ObjectId,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Last modification time, used as the access time of a rebuilt entry
    pub modified: Time,
}

/// The directory holding cached payloads.
///
/// A complete payload lives at `<root>/<object id>`. Downloads in progress write to
/// `<root>/<object id>.<generation>.partial` and are renamed into place once verified, so a
/// payload file at its final path is always complete.
#[derive(Debug, Clone)]
pub struct ContentDir {
    root: PathBuf,
}

impl ContentDir {
    /// Open `root`, creating it if it does not exist
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| CacheError::CreateDir {
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Spool file for one download attempt sequence of `id`
    pub fn partial_path(&self, id: &ObjectId, generation: u64) -> PathBuf {
        self.root
            .join(format!("{}.{generation}{PARTIAL_EXTENSION}", id.as_str()))
    }

    /// Detect the content type of the stored payload of `id` from its first bytes
    pub async fn detect_content_type(&self, id: &ObjectId) -> std::io::Result<String> {
        let file = tokio::fs::File::open(self.object_path(id)).await?;
        let mut head = Vec::with_capacity(CONTENT_SNIFF_LEN);
        file.take(CONTENT_SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .await?;
        Ok(sniff_content_type(&head)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string())
    }

    /// List the complete payloads in the directory.
    ///
    /// Leftover partial files from an interrupted run are deleted. Entries that are not payloads
    /// of a valid object id are skipped.
    pub async fn scan(&self) -> Result<Vec<StoredObject>, CacheError> {
        let scan_err = |source| CacheError::Scan {
            path: self.root.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(scan_err)?;

        let mut objects = vec![];
        while let Some(dir_entry) = dir.next_entry().await.map_err(scan_err)? {
            let path = dir_entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping non UTF-8 file in content directory");
                continue;
            };

            if name.ends_with(PARTIAL_EXTENSION) {
                info!(path = %path.display(), "removing incomplete download");
                if let Err(error) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), %error, "failed to remove incomplete download");
                }
                continue;
            }

            let object_id: ObjectId = match name.parse() {
                Ok(id) => id,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unrecognised file in content directory");
                    continue;
                }
            };

            let metadata = match dir_entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => {
                    warn!(path = %path.display(), "skipping non-file entry in content directory");
                    continue;
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to stat cached payload");
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| Time::from_timestamp_nanos(d.as_nanos() as i64))
                .unwrap_or_else(|| Time::from_timestamp_nanos(0));

            objects.push(StoredObject {
                object_id,
                path,
                size_bytes: metadata.len(),
                modified,
            });
        }

        debug!(root = %self.root.display(), objects = objects.len(), "scanned content directory");
        Ok(objects)
    }
}

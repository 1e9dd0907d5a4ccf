//! Blob storage for exported reports and uploaded photos
//!
//! Objects are addressed by slash-separated paths. Every object gets a
//! sidecar metadata record holding its download token, content type, size
//! and creation time. Writes are atomic (write to temp file, then rename)
//! so a reader never sees a partially-written object.
//!
//! Layout under the store root:
//! - `objects/<path>` - object bytes
//! - `meta/<path>.json` - sidecar metadata

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::storage::error::{BlobError, BlobResult};

/// Metadata stored next to every object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobMeta {
    /// Access token that must accompany download requests
    pub token: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl BlobMeta {
    pub fn token_matches(&self, token: &str) -> bool {
        !token.is_empty() && self.token == token
    }
}

/// An object path together with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub path: String,
    pub meta: BlobMeta,
}

/// Durable object storage
pub trait BlobStore: Send + Sync {
    /// Write an object, minting a fresh access token
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> BlobResult<BlobMeta>;

    /// Read an object and its metadata
    fn get(&self, path: &str) -> BlobResult<(Vec<u8>, BlobMeta)>;

    /// Delete an object; deleting a missing object is not an error
    fn delete(&self, path: &str) -> BlobResult<()>;

    /// List objects whose path starts with `prefix`
    fn list(&self, prefix: &str) -> BlobResult<Vec<StoredBlob>>;
}

/// Filesystem-backed blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, path: &str) -> PathBuf {
        self.root.join("objects").join(path)
    }

    fn meta_path(&self, path: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", path))
    }

    fn read_meta(&self, path: &str) -> BlobResult<BlobMeta> {
        let meta_path = self.meta_path(path);
        let raw = fs::read(&meta_path).map_err(|e| BlobError::from_io(e, meta_path.clone()))?;
        serde_json::from_slice(&raw).map_err(|e| BlobError::InvalidMetadata {
            path: path.to_string(),
            details: e.to_string(),
        })
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> BlobResult<BlobMeta> {
        validate_object_path(path)?;

        let meta = BlobMeta {
            token: Uuid::new_v4().to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(|e| BlobError::InvalidMetadata {
            path: path.to_string(),
            details: e.to_string(),
        })?;

        atomic_write(&self.object_path(path), bytes)?;
        if let Err(e) = atomic_write(&self.meta_path(path), &meta_bytes) {
            remove_leftover(&self.object_path(path));
            return Err(e);
        }

        Ok(meta)
    }

    fn get(&self, path: &str) -> BlobResult<(Vec<u8>, BlobMeta)> {
        validate_object_path(path)?;

        let object_path = self.object_path(path);
        if !object_path.exists() {
            return Err(BlobError::NotFound(path.to_string()));
        }

        let bytes = fs::read(&object_path).map_err(|e| BlobError::from_io(e, object_path))?;
        let meta = self.read_meta(path)?;
        Ok((bytes, meta))
    }

    fn delete(&self, path: &str) -> BlobResult<()> {
        validate_object_path(path)?;

        for file in [self.object_path(path), self.meta_path(path)] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BlobError::from_io(e, file)),
            }
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> BlobResult<Vec<StoredBlob>> {
        let meta_root = self.root.join("meta");
        let mut found = Vec::new();
        if meta_root.exists() {
            collect_meta_files(&meta_root, &meta_root, &mut found)?;
        }

        let mut blobs = Vec::new();
        for path in found.into_iter().filter(|p| p.starts_with(prefix)) {
            match self.read_meta(&path) {
                Ok(meta) => blobs.push(StoredBlob { path, meta }),
                Err(e) => warn!("Skipping object {} with unreadable metadata: {}", path, e),
            }
        }
        blobs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(blobs)
    }
}

/// Recursively collect object paths from the metadata tree
fn collect_meta_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> BlobResult<()> {
    for entry in fs::read_dir(dir).map_err(|e| BlobError::from_io(e, dir.to_path_buf()))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_meta_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if let Some(object) = relative.strip_suffix(".json") {
                out.push(object.to_string());
            }
        }
    }
    Ok(())
}

/// Reject object paths that are empty, absolute or escape the store root
pub fn validate_object_path(path: &str) -> BlobResult<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.chars().any(char::is_control)
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        Err(BlobError::InvalidPath(path.to_string()))
    } else {
        Ok(())
    }
}

/// Best-effort cleanup after a failed write; a file that never appeared is fine
fn remove_leftover(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove leftover file {:?}: {}", path, e);
        }
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> BlobResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BlobError::from_io(e, parent.to_path_buf()))?;
    }

    // Unique temp name so concurrent writers never share one
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        remove_leftover(&temp_path);
        return Err(BlobError::from_io(e, path.to_path_buf()));
    }
    Ok(())
}

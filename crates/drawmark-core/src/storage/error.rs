//! Storage error handling
//!
//! Typed errors for the annotation database and the blob store, with
//! descriptive messages and I/O classification.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::identity::FileId;

/// Errors from the annotation database
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Annotation body could not be encoded
    #[error("Failed to encode annotation: {0}")]
    Encode(#[from] serde_json::Error),

    /// No file record with this id
    #[error("File record not found: {0}")]
    FileNotFound(FileId),

    /// Page numbers are 1-based
    #[error("Invalid page number {0}: pages start at 1")]
    InvalidPage(u32),

    /// Camera pins are append-only
    #[error("Camera pin '{0}' already exists")]
    DuplicatePin(String),

    /// Caller input rejected before writing
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// Reference number allocation kept conflicting
    #[error("Reference number allocation for {file_id} gave up after {attempts} conflicting attempts")]
    AllocatorExhausted { file_id: FileId, attempts: u32 },

    /// Failed to create the database directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Whether the error is SQLite reporting a lock or snapshot conflict
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Database(e) => is_busy(e),
            _ => false,
        }
    }
}

/// Check whether a SQLite error is a lock / snapshot conflict
pub fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Result type for annotation store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the blob store
#[derive(Error, Debug)]
pub enum BlobError {
    /// Object path escapes the store root or is empty
    #[error("Invalid object path '{0}'")]
    InvalidPath(String),

    /// Object does not exist
    #[error("Object not found: '{0}'")]
    NotFound(String),

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Sidecar metadata unreadable
    #[error("Invalid object metadata for '{path}': {details}")]
    InvalidMetadata { path: String, details: String },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BlobError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => BlobError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => BlobError::NotFound(path.display().to_string()),
            _ if is_disk_full_error(&error) => BlobError::DiskFull {
                path,
                source: error,
            },
            _ => BlobError::WriteError {
                path,
                source: error,
            },
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = BlobError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, BlobError::PermissionDenied { .. }));
    }

    #[test]
    fn test_not_found_classification() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = BlobError::from_io(io_err, PathBuf::from("/missing/file"));
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = BlobError::from_io(io_err, PathBuf::from("/full/disk"));
        assert!(matches!(err, BlobError::DiskFull { .. }));
    }

    #[test]
    fn test_allocator_exhausted_display() {
        let err = StoreError::AllocatorExhausted {
            file_id: FileId::from_raw("abc"),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("3 conflicting attempts"));
    }

    #[test]
    fn test_busy_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(is_busy(&busy));
        assert!(StoreError::Database(busy).is_busy());
        assert!(!StoreError::InvalidPage(0).is_busy());
    }
}

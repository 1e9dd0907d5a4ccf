//! Storage layer
//!
//! Handles the SQLite annotation database and the blob store for
//! exported reports and uploaded photos.
//!
//! ## Architecture
//!
//! - **SQLite**: file records, pages, annotations, counters, export history
//! - **Blob store**: binary objects with per-object access tokens

pub mod blob;
pub mod database;
pub mod error;
pub mod schema;

pub use blob::{validate_object_path, BlobMeta, BlobStore, FsBlobStore, StoredBlob};
pub use database::Database;
pub use error::{BlobError, BlobResult, StoreError, StoreResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};

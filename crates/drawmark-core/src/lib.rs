//! Drawmark Core Library
//!
//! This crate provides the core functionality for Drawmark: persistent
//! freehand annotations on remote drawing documents, with per-file
//! reference numbers, plus composition and publishing of PDF reports.
//!
//! # Architecture
//!
//! - **SQLite**: file records, pages, annotations, counters, export history
//! - **Blob store**: exported reports and camera photos, token-protected
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let db = Database::open(&config)?;
//!
//! let source = DocumentSource::new(file_url, "plan.pdf");
//! let mut store = AnnotationStore::open(&db, &source, Some("P1"))?;
//! let stroke = store.save_stroke(1, &NewStroke::pen(0xFFFF0000, 4.0, points))?;
//!
//! let pdf = compose(&request)?;
//! let export = Publisher::from_config(&config, db).publish(pdf, &publish_request)?;
//! ```
//!
//! # Modules
//!
//! - `identity`: stable file ids from remote references
//! - `allocator`: per-file reference numbers
//! - `store`: annotation store (main entry point)
//! - `records`: defensive parsing of stored annotation bodies
//! - `report`: PDF report composer
//! - `publish`: export publisher and blob access
//! - `models`: data structures for files, pages and annotations
//! - `storage`: SQLite database and blob storage
//! - `config`: application configuration

pub mod allocator;
pub mod config;
pub mod identity;
pub mod models;
pub mod publish;
pub mod records;
pub mod report;
pub mod storage;
pub mod store;

pub use allocator::RefAllocator;
pub use config::Config;
pub use identity::{resolve_file_id, DocumentSource, FileId};
pub use models::{
    Annotation, CameraPin, ExportEntry, FileRecord, NewCameraPin, NewStroke, Note, NoteKind,
    PageRecord, Point, Rect, Stroke,
};
pub use publish::{PublishError, PublishRequest, PublishedExport, Publisher, SweepReport, UploadedImage};
pub use report::{compose, ComposeError, MarkerImage, PhotoMarker, ProjectInfo, RasterPage, ReportRequest};
pub use storage::{BlobError, BlobStore, Database, FsBlobStore, StoreError};
pub use store::{AnnotationStore, PageAnnotations};

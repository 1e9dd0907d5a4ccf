//! Export publishing
//!
//! The `Publisher` owns the blob store. It writes composed reports under
//! fresh timestamped paths, hands out tokenized download URLs in the REST
//! dialect (`/v0/b/<bucket>/o/<encoded path>?alt=media&token=...`) and
//! records each export in the history of the file it was produced from.
//!
//! Every completed publish is marked in `published_exports`, and history is
//! only appended after the object write succeeded. If either step fails, the
//! freshly written object is deleted again; anything left behind by a crash
//! in between is unmarked and removed by `sweep_orphans`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::identity::{parse_object_ref, DocumentSource, FileId};
use crate::models::ExportEntry;
use crate::storage::{BlobError, BlobMeta, BlobStore, Database, FsBlobStore, StoreError};
use crate::store::{self, AnnotationStore};

/// Characters left unescaped in a URL path component
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

const EXPORT_PREFIX: &str = "exports/";
const DEFAULT_FILE_NAME: &str = "report.pdf";
const MAX_FILE_NAME_CHARS: usize = 120;
/// Keeps `<timestamp>-<nonce>-<name>` well under the 255-byte file name limit
const MAX_FILE_NAME_BYTES: usize = 150;

/// Errors from publishing and serving stored objects
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("project id is required")]
    MissingProject,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid or missing download token")]
    InvalidToken,

    #[error("unsupported image data")]
    UnsupportedImage,

    #[error("blob storage failed: {0}")]
    Blob(#[from] BlobError),

    #[error("annotation store failed: {0}")]
    Store(#[from] StoreError),
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Who exported what, from which source document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishRequest {
    pub project_id: String,
    /// Display name of the source drawing; becomes the artifact's file name
    pub file_name: Option<String>,
    /// Remote reference of the source drawing; no history is recorded without it
    pub file_url: Option<String>,
    pub exported_by: String,
    pub source_pdf_id: Option<String>,
}

/// A published artifact
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedExport {
    pub bytes: Vec<u8>,
    pub url: String,
    pub path: String,
    pub file_name: String,
    /// File record the export was recorded against, if any
    pub file_id: Option<FileId>,
}

/// A stored camera photo
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedImage {
    pub url: String,
    pub path: String,
    pub content_type: String,
}

/// Outcome of an orphan sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<String>,
}

pub struct Publisher {
    blobs: Arc<dyn BlobStore>,
    db: Database,
    bucket: String,
    base_url: String,
}

impl Publisher {
    pub fn new(blobs: Arc<dyn BlobStore>, db: Database, bucket: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            blobs,
            db,
            bucket: bucket.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Publisher over the filesystem blob store under the configured data dir
    pub fn from_config(config: &Config, db: Database) -> Self {
        Self::new(
            Arc::new(FsBlobStore::new(config.blob_root())),
            db,
            config.bucket.clone(),
            config.public_base_url(),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Tokenized download URL for an object in this publisher's bucket
    pub fn download_url(&self, path: &str, token: &str) -> String {
        format!(
            "{}/v0/b/{}/o/{}?alt=media&token={}",
            self.base_url,
            utf8_percent_encode(&self.bucket, COMPONENT),
            utf8_percent_encode(path, COMPONENT),
            utf8_percent_encode(token, COMPONENT)
        )
    }

    /// Store a composed report and record it in the source file's history
    ///
    /// Every call writes a new object; nothing is deduplicated.
    pub fn publish(&self, bytes: Vec<u8>, request: &PublishRequest) -> PublishResult<PublishedExport> {
        let project = path_segment(&request.project_id).ok_or(PublishError::MissingProject)?;
        let file_name = sanitize_file_name(request.file_name.as_deref().unwrap_or_default());
        let now = Utc::now();
        let path = export_path(&project, &file_name, now);

        let meta = self.blobs.put(&path, &bytes, "application/pdf")?;
        let url = self.download_url(&path, &meta.token);

        if let Err(e) = store::record_published(&self.db, &path, &request.project_id, &url, now) {
            warn!("Marking export {} as published failed: {}", path, e);
            self.discard(&path, false);
            return Err(e.into());
        }

        let file_id = match request.file_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(file_url) => {
                let entry = ExportEntry {
                    url: url.clone(),
                    exported_by: request.exported_by.clone(),
                    source_pdf_id: request.source_pdf_id.clone(),
                    exported_at: now,
                };
                let source_name = request
                    .file_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(&file_name);

                match self.record_history(file_url, source_name, &request.project_id, &entry) {
                    Ok(file_id) => Some(file_id),
                    Err(e) => {
                        warn!("Recording export history failed, removing {}: {}", path, e);
                        self.discard(&path, true);
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        info!(
            "Published export {} ({} bytes) for project {}",
            path,
            bytes.len(),
            request.project_id
        );

        Ok(PublishedExport {
            bytes,
            url,
            path,
            file_name,
            file_id,
        })
    }

    /// Best-effort removal of an export that did not complete
    fn discard(&self, path: &str, published: bool) {
        if published {
            if let Err(e) = store::forget_published(&self.db, path) {
                warn!("Failed to unmark export {}: {}", path, e);
            }
        }
        if let Err(e) = self.blobs.delete(path) {
            warn!("Failed to remove orphaned export {}: {}", path, e);
        }
    }

    fn record_history(
        &self,
        file_url: &str,
        file_name: &str,
        project_id: &str,
        entry: &ExportEntry,
    ) -> Result<FileId, StoreError> {
        let source = DocumentSource::new(file_url, file_name);
        let mut store = AnnotationStore::open(&self.db, &source, Some(project_id))?;
        store.record_export(entry)?;
        Ok(store.file_id().clone())
    }

    /// Store a camera photo for a pin and return its download URL
    pub fn upload_camera_image(
        &self,
        file_id: &FileId,
        page: u32,
        pin_id: &str,
        bytes: &[u8],
    ) -> PublishResult<UploadedImage> {
        if page == 0 {
            return Err(StoreError::InvalidPage(page).into());
        }
        let pin = path_segment(pin_id)
            .ok_or_else(|| StoreError::InvalidAnnotation("camera pin id is required".to_string()))?;
        let format = image::guess_format(bytes).map_err(|_| PublishError::UnsupportedImage)?;
        let extension = format
            .extensions_str()
            .first()
            .copied()
            .ok_or(PublishError::UnsupportedImage)?;
        let content_type = format.to_mime_type().to_string();

        let path = format!(
            "annotations/{}/pages/{}/pins/{}/{}.{}",
            file_id,
            page,
            pin,
            Utc::now().timestamp_millis(),
            extension
        );
        let meta = self.blobs.put(&path, bytes, &content_type)?;

        Ok(UploadedImage {
            url: self.download_url(&path, &meta.token),
            path,
            content_type,
        })
    }

    /// Read an object of this publisher's bucket, checking its token
    pub fn download(&self, bucket: &str, path: &str, token: &str) -> PublishResult<(Vec<u8>, BlobMeta)> {
        if bucket != self.bucket {
            return Err(PublishError::NotFound(format!("{}/{}", bucket, path)));
        }
        let (bytes, meta) = self.blobs.get(path).map_err(|e| match e {
            BlobError::NotFound(p) | BlobError::InvalidPath(p) => PublishError::NotFound(p),
            other => PublishError::Blob(other),
        })?;
        if !meta.token_matches(token) {
            return Err(PublishError::InvalidToken);
        }
        Ok((bytes, meta))
    }

    /// Read a download URL minted by this publisher
    ///
    /// Returns `None` when the URL does not point into this bucket.
    pub fn read_download_url(&self, reference: &str) -> Option<PublishResult<Vec<u8>>> {
        let object = parse_object_ref(reference).filter(|o| o.bucket == self.bucket)?;
        let token = Url::parse(reference)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        Some(self.download(&object.bucket, &object.object_path, &token).map(|(bytes, _)| bytes))
    }

    /// Delete export objects older than `older_than` whose publish never completed
    ///
    /// An object survives if it was marked published or if any file's
    /// export history points at it.
    pub fn sweep_orphans(&self, older_than: Duration) -> PublishResult<SweepReport> {
        let mut kept = store::published_paths(&self.db)?;
        kept.extend(
            store::exported_urls(&self.db)?
                .iter()
                .filter_map(|url| parse_object_ref(url))
                .filter(|o| o.bucket == self.bucket)
                .map(|o| o.object_path),
        );
        let cutoff = Utc::now() - older_than;

        let mut report = SweepReport::default();
        for blob in self.blobs.list(EXPORT_PREFIX)? {
            report.scanned += 1;
            if blob.meta.created_at > cutoff || kept.contains(&blob.path) {
                continue;
            }
            self.blobs.delete(&blob.path)?;
            info!("Swept orphaned export {}", blob.path);
            report.deleted.push(blob.path);
        }
        Ok(report)
    }
}

/// `exports/<project>/<yyyyMMddTHHmmssSSS>-<8 hex>-<name>`
fn export_path(project: &str, file_name: &str, now: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}/{}-{}-{}",
        EXPORT_PREFIX,
        project,
        now.format("%Y%m%dT%H%M%S%3f"),
        &nonce[..8],
        file_name
    )
}

/// Make a caller-supplied id safe as a single object path segment
fn path_segment(raw: &str) -> Option<String> {
    let segment: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if segment.is_empty() || segment.chars().all(|c| c == '.') {
        None
    } else {
        Some(segment)
    }
}

/// Clean a caller-supplied file name for use in paths and headers
///
/// Strips path separators, control characters and double quotes, collapses
/// whitespace, normalizes the `.pdf` extension and caps the length.
pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|&c| c.is_whitespace() || !(c.is_control() || matches!(c, '/' | '\\' | '"')))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let stem = match collapsed.len().checked_sub(4).and_then(|i| collapsed.get(i..).map(|ext| (i, ext))) {
        Some((i, ext)) if ext.eq_ignore_ascii_case(".pdf") => &collapsed[..i],
        _ => collapsed.as_str(),
    };
    let stem: String = stem.trim().chars().take(MAX_FILE_NAME_CHARS - 4).collect();
    let stem = truncate_bytes(&stem, MAX_FILE_NAME_BYTES - 4).trim_end();

    if stem.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        format!("{}.pdf", stem)
    }
}

/// Longest prefix of `s` within `max` bytes, cut on a char boundary
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

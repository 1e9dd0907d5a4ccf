//! Annotation store
//!
//! The `AnnotationStore` is the entry point for reading and writing the
//! annotations of one file record. It owns its own database connection.
//!
//! ## Hierarchy
//!
//! ```text
//! files/<fileId>
//!   file_meta
//!   pages/<pageNumber>
//!     strokes/<docId>      append-only, refNo allocated
//!     notes/<noteId>       merge-upsert by caller id
//!     camera_pins/<pinId>  append-only, refNo allocated
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let db = Database::open(&config)?;
//! let mut store = AnnotationStore::open(&db, &DocumentSource::new(url, "plan.pdf"), None)?;
//!
//! let stroke = store.save_stroke(1, &NewStroke::pen(0xFFFF0000, 4.0, points))?;
//! let pages = store.load_all()?;
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::allocator::RefAllocator;
use crate::identity::{DocumentSource, FileId};
use crate::models::{
    Annotation, CameraPin, ExportEntry, FileRecord, NewCameraPin, NewStroke, Note, PageRecord,
    Rect, Stroke,
};
use crate::records::{self, RecordError};
use crate::storage::database::{from_millis, to_millis};
use crate::storage::{Database, StoreError, StoreResult};

/// Annotations grouped by page number
pub type PageAnnotations = BTreeMap<u32, Vec<Annotation>>;

/// Read/write access to the annotations of one file record
pub struct AnnotationStore {
    conn: Connection,
    file_id: FileId,
    allocator: RefAllocator,
}

impl AnnotationStore {
    /// Open the file record for a document source, creating it on first use
    ///
    /// Idempotent: an existing record (same canonical source and display
    /// name) is reused, never recreated. A project id is only filled in if
    /// the record does not have one yet.
    pub fn open(db: &Database, source: &DocumentSource, project_id: Option<&str>) -> StoreResult<Self> {
        let mut conn = db.connect()?;
        let file_id = init(&mut conn, source, project_id)?;
        Ok(Self::with_connection(conn, file_id))
    }

    /// Open an existing file record by id
    pub fn attach(db: &Database, file_id: &FileId) -> StoreResult<Self> {
        let conn = db.connect()?;
        let exists = conn
            .prepare("SELECT 1 FROM files WHERE id = ?1")?
            .exists(params![file_id.as_str()])?;
        if !exists {
            return Err(StoreError::FileNotFound(file_id.clone()));
        }
        Ok(Self::with_connection(conn, file_id.clone()))
    }

    fn with_connection(conn: Connection, file_id: FileId) -> Self {
        Self {
            conn,
            allocator: RefAllocator::new(file_id.clone()),
            file_id,
        }
    }

    /// Override how often a conflicting ref number allocation is retried
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.allocator = self.allocator.with_max_attempts(max_attempts);
        self
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    // ==================== File Record ====================

    /// Get the file record, including its export history
    pub fn file_record(&self) -> StoreResult<FileRecord> {
        load_file_record(&self.conn, &self.file_id)?.ok_or_else(|| StoreError::FileNotFound(self.file_id.clone()))
    }

    /// Pages that have received at least one annotation write
    pub fn pages(&self) -> StoreResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_number, created_at FROM pages WHERE file_id = ?1 ORDER BY page_number",
        )?;
        let rows = stmt.query_map(params![self.file_id.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut pages = Vec::new();
        for row in rows {
            let (page_number, created_at) = row?;
            match u32::try_from(page_number) {
                Ok(page_number) => pages.push(PageRecord {
                    page_number,
                    created_at: from_millis(created_at),
                }),
                Err(_) => warn!("Skipping page row {} of {}", page_number, self.file_id),
            }
        }
        Ok(pages)
    }

    /// Append a history entry and move the latest-export pointer
    pub fn record_export(&mut self, entry: &ExportEntry) -> StoreResult<()> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO export_history (file_id, url, exported_by, source_pdf_id, exported_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.file_id.as_str(),
                entry.url,
                entry.exported_by,
                entry.source_pdf_id,
                to_millis(entry.exported_at)
            ],
        )?;
        tx.execute(
            "UPDATE files SET exported_pdf_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![entry.url, to_millis(Utc::now()), self.file_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Strokes ====================

    /// Save a stroke under a freshly allocated reference number
    pub fn save_stroke(&mut self, page: u32, input: &NewStroke) -> StoreResult<Stroke> {
        validate_page(page)?;
        if input.points.is_empty() {
            return Err(StoreError::InvalidAnnotation("stroke has no points".to_string()));
        }
        if !(input.width.is_finite() && input.width > 0.0) {
            return Err(StoreError::InvalidAnnotation(format!(
                "stroke width must be positive, got {}",
                input.width
            )));
        }

        let file_id = self.file_id.clone();
        let mut saved = None;

        self.allocator.allocate_with(&mut self.conn, |tx, ref_no| {
            let now = Utc::now();
            let stroke = Stroke {
                ref_no,
                page,
                color: input.color,
                width: input.width,
                tool_type: input.tool_type.clone(),
                is_eraser: input.is_eraser,
                points: input.points.clone(),
                pressure_values: input.pressure_values.clone(),
                bbox: Rect::bounding(&input.points),
                author: input.author.clone(),
                created_at: now,
                updated_at: now,
            };

            ensure_page(tx, &file_id, page)?;
            tx.execute(
                "INSERT INTO strokes (file_id, page_number, doc_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![
                    file_id.as_str(),
                    page,
                    Uuid::new_v4().to_string(),
                    serde_json::to_string(&stroke)?
                ],
            )?;
            touch(tx, &file_id)?;

            saved = Some(stroke);
            Ok(())
        })?;

        saved.ok_or_else(|| StoreError::InvalidAnnotation("stroke was not written".to_string()))
    }

    // ==================== Notes ====================

    /// Create a note (merge-upsert keyed by the note's id)
    pub fn create_note(&mut self, page: u32, note: &Note) -> StoreResult<Note> {
        self.upsert_note(page, note)
    }

    /// Update a note (merge-upsert keyed by the note's id)
    pub fn update_note(&mut self, page: u32, note: &Note) -> StoreResult<Note> {
        self.upsert_note(page, note)
    }

    fn upsert_note(&mut self, page: u32, note: &Note) -> StoreResult<Note> {
        let patch = serde_json::to_value(note)?;
        self.merge_note(page, &note.id, &patch)
    }

    /// Merge a partial JSON note into the stored one (or create it)
    ///
    /// Fields present in `patch` overwrite stored ones; the stored
    /// `createdAt` always wins. Last write wins across clients.
    pub fn merge_note(&mut self, page: u32, id: &str, patch: &Value) -> StoreResult<Note> {
        validate_page(page)?;
        if id.trim().is_empty() {
            return Err(StoreError::InvalidAnnotation("note id is required".to_string()));
        }
        let patch = patch
            .as_object()
            .ok_or_else(|| StoreError::InvalidAnnotation("note must be a JSON object".to_string()))?;

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM notes WHERE file_id = ?1 AND page_number = ?2 AND doc_id = ?3",
                params![self.file_id.as_str(), page, id],
                |row| row.get(0),
            )
            .optional()?;

        let now = Value::String(Utc::now().to_rfc3339());
        let mut merged = existing
            .and_then(|body| serde_json::from_str::<Value>(&body).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        let created_at = merged.get("createdAt").cloned();

        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert("id".to_string(), Value::String(id.to_string()));
        merged.insert("page".to_string(), Value::from(page));
        merged.insert("createdAt".to_string(), created_at.unwrap_or_else(|| now.clone()));
        merged.insert("updatedAt".to_string(), now);

        let merged = Value::Object(merged);
        let note = records::parse_note(page, id, &merged)
            .map_err(|e| StoreError::InvalidAnnotation(format!("note {}: {}", id, e)))?;

        ensure_page(&tx, &self.file_id, page)?;
        tx.execute(
            "INSERT INTO notes (file_id, page_number, doc_id, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (file_id, page_number, doc_id) DO UPDATE SET body = excluded.body",
            params![self.file_id.as_str(), page, id, serde_json::to_string(&note)?],
        )?;
        touch(&tx, &self.file_id)?;
        tx.commit()?;

        Ok(note)
    }

    /// Hard-delete a note. Returns whether it existed.
    pub fn delete_note(&mut self, page: u32, id: &str) -> StoreResult<bool> {
        self.delete_record("notes", page, id)
    }

    // ==================== Camera Pins ====================

    /// Save a camera pin under a freshly allocated reference number
    ///
    /// The pin records `remote_image_url` when given, otherwise the
    /// capturing device's local image path.
    pub fn save_camera_pin(
        &mut self,
        page: u32,
        input: &NewCameraPin,
        remote_image_url: Option<&str>,
    ) -> StoreResult<CameraPin> {
        validate_page(page)?;
        if input.id.trim().is_empty() {
            return Err(StoreError::InvalidAnnotation("camera pin id is required".to_string()));
        }

        let file_id = self.file_id.clone();
        let image_url = remote_image_url
            .map(str::to_string)
            .or_else(|| input.image_path.clone())
            .filter(|s| !s.is_empty());
        let mut saved = None;

        self.allocator.allocate_with(&mut self.conn, |tx, ref_no| {
            let exists = tx
                .prepare_cached(
                    "SELECT 1 FROM camera_pins WHERE file_id = ?1 AND page_number = ?2 AND doc_id = ?3",
                )?
                .exists(params![file_id.as_str(), page, input.id])?;
            if exists {
                return Err(StoreError::DuplicatePin(input.id.clone()));
            }

            let pin = CameraPin {
                id: input.id.clone(),
                ref_no,
                page,
                position: input.position,
                image_url: image_url.clone(),
                note: input.note.clone().filter(|s| !s.is_empty()),
                author: input.author.clone(),
                created_at: Utc::now(),
            };

            ensure_page(tx, &file_id, page)?;
            tx.execute(
                "INSERT INTO camera_pins (file_id, page_number, doc_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![file_id.as_str(), page, pin.id, serde_json::to_string(&pin)?],
            )?;
            touch(tx, &file_id)?;

            saved = Some(pin);
            Ok(())
        })?;

        saved.ok_or_else(|| StoreError::InvalidAnnotation("camera pin was not written".to_string()))
    }

    /// Hard-delete a camera pin. Its ref number is never reissued.
    pub fn delete_camera_pin(&mut self, page: u32, id: &str) -> StoreResult<bool> {
        self.delete_record("camera_pins", page, id)
    }

    fn delete_record(&mut self, table: &str, page: u32, id: &str) -> StoreResult<bool> {
        validate_page(page)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE file_id = ?1 AND page_number = ?2 AND doc_id = ?3",
                table
            ),
            params![self.file_id.as_str(), page, id],
        )?;
        touch(&tx, &self.file_id)?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // ==================== Bulk Load ====================

    /// Load every annotation of the file, grouped by page
    ///
    /// Defensive: malformed records are skipped, and a failure reading one
    /// variant on one page is logged without aborting the rest. Within a
    /// page, strokes come first (by refNo), then notes (by creation time),
    /// then camera pins (by refNo). Pages without any readable annotation
    /// are omitted.
    pub fn load_all(&self) -> StoreResult<PageAnnotations> {
        let mut result = PageAnnotations::new();

        for page in self.pages()? {
            let page = page.page_number;
            let mut annotations = Vec::new();

            let mut strokes = self.load_variant("strokes", page, |_, body| records::parse_stroke(page, body));
            strokes.sort_by_key(|s| s.ref_no);
            annotations.extend(strokes.into_iter().map(Annotation::Stroke));

            let mut notes = self.load_variant("notes", page, |doc_id, body| records::parse_note(page, doc_id, body));
            notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            annotations.extend(notes.into_iter().map(Annotation::Note));

            let mut pins = self.load_variant("camera_pins", page, |doc_id, body| {
                records::parse_camera_pin(page, doc_id, body)
            });
            pins.sort_by_key(|p| p.ref_no);
            annotations.extend(pins.into_iter().map(Annotation::CameraPin));

            if !annotations.is_empty() {
                result.insert(page, annotations);
            }
        }

        Ok(result)
    }

    /// Read one variant table for one page, keeping only records that parse
    fn load_variant<T>(
        &self,
        table: &str,
        page: u32,
        parse: impl Fn(&str, &Value) -> Result<T, RecordError>,
    ) -> Vec<T> {
        let rows = match self.read_rows(table, page) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to read {} on page {} of {}: {}", table, page, self.file_id, e);
                return Vec::new();
            }
        };

        let mut parsed = Vec::with_capacity(rows.len());
        for (doc_id, body) in rows {
            let value = match serde_json::from_str::<Value>(&body) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping unreadable {} record {} on page {}: {}", table, doc_id, page, e);
                    continue;
                }
            };
            match parse(&doc_id, &value) {
                Ok(record) => parsed.push(record),
                Err(e) => warn!("Skipping malformed {} record {} on page {}: {}", table, doc_id, page, e),
            }
        }
        parsed
    }

    fn read_rows(&self, table: &str, page: u32) -> StoreResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT doc_id, body FROM {} WHERE file_id = ?1 AND page_number = ?2",
            table
        ))?;
        let rows = stmt.query_map(params![self.file_id.as_str(), page], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Ensure the file record and its metadata sub-record exist
///
/// Returns the resolved file id. Safe to call any number of times.
pub fn init(conn: &mut Connection, source: &DocumentSource, project_id: Option<&str>) -> StoreResult<FileId> {
    let file_id = source.file_id();
    let now = to_millis(Utc::now());

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let created = tx.execute(
        "INSERT OR IGNORE INTO files (id, file_url, file_name, project_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![file_id.as_str(), source.file_url, source.file_name, project_id, now],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO file_meta (file_id, canonical_source, created_at) VALUES (?1, ?2, ?3)",
        params![file_id.as_str(), source.canonical_base(), now],
    )?;
    if created == 0 {
        if let Some(project_id) = project_id {
            tx.execute(
                "UPDATE files SET project_id = ?1 WHERE id = ?2 AND project_id IS NULL",
                params![project_id, file_id.as_str()],
            )?;
        }
    }
    tx.commit()?;

    if created > 0 {
        debug!("Created file record {} for {}", file_id, source.file_name);
    }
    Ok(file_id)
}

/// Load a file record with its history
pub fn load_file_record(conn: &Connection, file_id: &FileId) -> StoreResult<Option<FileRecord>> {
    let row = conn
        .query_row(
            "SELECT file_url, file_name, project_id, created_at, updated_at, exported_pdf_url
             FROM files WHERE id = ?1",
            params![file_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((file_url, file_name, project_id, created_at, updated_at, exported_pdf_url)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT url, exported_by, source_pdf_id, exported_at FROM export_history
         WHERE file_id = ?1 ORDER BY id",
    )?;
    let export_history = stmt
        .query_map(params![file_id.as_str()], |row| {
            Ok(ExportEntry {
                url: row.get(0)?,
                exported_by: row.get(1)?,
                source_pdf_id: row.get(2)?,
                exported_at: from_millis(row.get(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(FileRecord {
        id: file_id.clone(),
        file_url,
        file_name,
        project_id,
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
        exported_pdf_url,
        export_history,
    }))
}

/// Mark an export object as completely published
pub fn record_published(
    db: &Database,
    path: &str,
    project_id: &str,
    url: &str,
    published_at: DateTime<Utc>,
) -> StoreResult<()> {
    let conn = db.connect()?;
    conn.execute(
        "INSERT OR REPLACE INTO published_exports (path, project_id, url, published_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![path, project_id, url, to_millis(published_at)],
    )?;
    Ok(())
}

/// Undo `record_published` for an export that failed afterwards
pub fn forget_published(db: &Database, path: &str) -> StoreResult<()> {
    let conn = db.connect()?;
    conn.execute("DELETE FROM published_exports WHERE path = ?1", [path])?;
    Ok(())
}

/// Object paths of every completed export
pub fn published_paths(db: &Database) -> StoreResult<HashSet<String>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare("SELECT path FROM published_exports")?;
    let paths = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(paths)
}

/// Every URL recorded in any file's export history
pub fn exported_urls(db: &Database) -> StoreResult<HashSet<String>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare("SELECT url FROM export_history")?;
    let urls = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(urls)
}

fn validate_page(page: u32) -> StoreResult<()> {
    if page == 0 {
        Err(StoreError::InvalidPage(page))
    } else {
        Ok(())
    }
}

/// Lazily create the page record
fn ensure_page(conn: &Connection, file_id: &FileId, page: u32) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO pages (file_id, page_number, created_at) VALUES (?1, ?2, ?3)",
        params![file_id.as_str(), page, to_millis(Utc::now())],
    )?;
    Ok(())
}

/// Freshness marker for consumers polling the file record
fn touch(conn: &Connection, file_id: &FileId) -> StoreResult<()> {
    conn.execute(
        "UPDATE files SET updated_at = ?1 WHERE id = ?2",
        params![to_millis(Utc::now()), file_id.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NoteKind, Point};
    use serde_json::json;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    const PLAN_URL: &str = "https://firebasestorage.googleapis.com/v0/b/site-plans.appspot.com/o/project_files%2FP1%2Fplan.pdf?alt=media&token=AAA";

    fn test_db(temp_dir: &TempDir) -> Database {
        Database::open_path(temp_dir.path().join("drawmark.db")).unwrap()
    }

    fn plan_source() -> DocumentSource {
        DocumentSource::new(PLAN_URL, "plan.pdf")
    }

    fn red_stroke() -> NewStroke {
        NewStroke::pen(0xFFFF_0000, 4.0, vec![Point::new(10.0, 10.0), Point::new(50.0, 40.0)])
    }

    #[test]
    fn test_example_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);

        let mut store = AnnotationStore::open(&db, &plan_source(), Some("P1")).unwrap();
        let stroke = store.save_stroke(1, &red_stroke()).unwrap();
        assert_eq!(stroke.ref_no, 1);
        assert_eq!(stroke.page, 1);
        assert_eq!(stroke.color, 0xFFFF_0000);
        assert_eq!(stroke.width, 4.0);

        let record = store.file_record().unwrap();
        assert_eq!(record.id, plan_source().file_id());
        assert_eq!(record.project_id.as_deref(), Some("P1"));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&1], vec![Annotation::Stroke(stroke)]);

        let files: i64 = db
            .connect()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_idempotent_reopen_with_refreshed_token() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);

        {
            let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();
            store.save_stroke(1, &red_stroke()).unwrap();
            let note = Note::new("n1", NoteKind::Sticky, Point::new(5.0, 5.0), "check beam");
            store.create_note(2, &note).unwrap();
        }

        let refreshed = DocumentSource::new(PLAN_URL.replace("token=AAA", "token=ZZZ"), "plan.pdf");
        let store = AnnotationStore::open(&db, &refreshed, None).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(matches!(loaded[&1][0], Annotation::Stroke(_)));
        assert!(matches!(&loaded[&2][0], Annotation::Note(n) if n.text == "check beam"));

        // Original URL kept
        assert_eq!(store.file_record().unwrap().file_url, PLAN_URL);
    }

    #[test]
    fn test_open_fills_missing_project_id_only() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);

        AnnotationStore::open(&db, &plan_source(), None).unwrap();
        let store = AnnotationStore::open(&db, &plan_source(), Some("P1")).unwrap();
        assert_eq!(store.file_record().unwrap().project_id.as_deref(), Some("P1"));

        let store = AnnotationStore::open(&db, &plan_source(), Some("P2")).unwrap();
        assert_eq!(store.file_record().unwrap().project_id.as_deref(), Some("P1"));
    }

    #[test]
    fn test_attach_unknown_file() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let result = AnnotationStore::attach(&db, &FileId::from_raw("missing"));
        assert!(matches!(result, Err(StoreError::FileNotFound(_))));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        assert!(matches!(store.save_stroke(0, &red_stroke()), Err(StoreError::InvalidPage(0))));

        let empty = NewStroke::pen(0, 1.0, Vec::new());
        assert!(matches!(store.save_stroke(1, &empty), Err(StoreError::InvalidAnnotation(_))));

        let zero_width = NewStroke::pen(0, 0.0, vec![Point::new(1.0, 1.0)]);
        assert!(matches!(store.save_stroke(1, &zero_width), Err(StoreError::InvalidAnnotation(_))));

        // Rejections do not consume ref numbers
        assert_eq!(store.save_stroke(1, &red_stroke()).unwrap().ref_no, 1);
    }

    #[test]
    fn test_ref_numbers_shared_by_strokes_and_pins_never_reused() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        assert_eq!(store.save_stroke(1, &red_stroke()).unwrap().ref_no, 1);
        let pin = store
            .save_camera_pin(1, &NewCameraPin::new("pin-a", Point::new(1.0, 2.0)), None)
            .unwrap();
        assert_eq!(pin.ref_no, 2);

        assert!(store.delete_camera_pin(1, "pin-a").unwrap());
        let pin = store
            .save_camera_pin(1, &NewCameraPin::new("pin-b", Point::new(1.0, 2.0)), None)
            .unwrap();
        assert_eq!(pin.ref_no, 3);
    }

    #[test]
    fn test_camera_pin_image_url_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let mut input = NewCameraPin::new("pin-1", Point::new(3.0, 4.0));
        input.image_path = Some("/device/DCIM/1.jpg".to_string());
        input.note = Some("cracked tile".to_string());

        let local = store.save_camera_pin(1, &input, None).unwrap();
        assert_eq!(local.image_url.as_deref(), Some("/device/DCIM/1.jpg"));

        input.id = "pin-2".to_string();
        let remote = store
            .save_camera_pin(1, &input, Some("https://cdn.example.com/1.jpg"))
            .unwrap();
        assert_eq!(remote.image_url.as_deref(), Some("https://cdn.example.com/1.jpg"));
        assert_eq!(remote.note.as_deref(), Some("cracked tile"));
    }

    #[test]
    fn test_duplicate_pin_rejected_without_consuming_ref() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let input = NewCameraPin::new("pin-1", Point::new(1.0, 1.0));
        store.save_camera_pin(1, &input, None).unwrap();
        assert!(matches!(
            store.save_camera_pin(1, &input, None),
            Err(StoreError::DuplicatePin(id)) if id == "pin-1"
        ));
        assert_eq!(store.save_stroke(1, &red_stroke()).unwrap().ref_no, 2);
    }

    #[test]
    fn test_note_merge_upsert() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let note = Note::new("n1", NoteKind::Text, Point::new(1.0, 1.0), "first");
        let created = store.create_note(3, &note).unwrap();
        assert_eq!(created.page, 3);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store
            .merge_note(3, "n1", &json!({"text": "second", "annType": "sticky"}))
            .unwrap();
        assert_eq!(updated.text, "second");
        assert_eq!(updated.ann_type, NoteKind::Sticky);
        assert_eq!(updated.position, Point::new(1.0, 1.0));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[&3].len(), 1);
        assert_eq!(loaded[&3][0], Annotation::Note(updated));
    }

    #[test]
    fn test_note_update_creates_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let note = Note::new("late", NoteKind::Sticky, Point::new(2.0, 2.0), "hi");
        store.update_note(1, &note).unwrap();
        assert_eq!(store.load_all().unwrap()[&1].len(), 1);
    }

    #[test]
    fn test_note_merge_rejects_missing_position() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let result = store.merge_note(1, "n1", &json!({"text": "nowhere"}));
        assert!(matches!(result, Err(StoreError::InvalidAnnotation(_))));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_delete_note() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        let note = Note::new("n1", NoteKind::Text, Point::new(1.0, 1.0), "bye");
        store.create_note(1, &note).unwrap();
        assert!(store.delete_note(1, "n1").unwrap());
        assert!(!store.delete_note(1, "n1").unwrap());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_mutations_touch_updated_at() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();
        let before = store.file_record().unwrap().updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save_stroke(1, &red_stroke()).unwrap();
        assert!(store.file_record().unwrap().updated_at > before);
    }

    #[test]
    fn test_load_all_skips_corrupt_records() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();
        let good = store.save_stroke(1, &red_stroke()).unwrap();

        let conn = db.connect().unwrap();
        let file_id = store.file_id().as_str();
        conn.execute(
            "INSERT INTO strokes (file_id, page_number, doc_id, body) VALUES (?1, 1, 'bad', ?2)",
            params![file_id, json!({"refNo": 9, "color": 1, "width": 2}).to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO strokes (file_id, page_number, doc_id, body) VALUES (?1, 1, 'garbage', '{not json')",
            params![file_id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO camera_pins (file_id, page_number, doc_id, body) VALUES (?1, 1, 'pin', '[]')",
            params![file_id],
        )
        .unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[&1], vec![Annotation::Stroke(good)]);
    }

    #[test]
    fn test_load_all_orders_variants() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        store
            .save_camera_pin(1, &NewCameraPin::new("pin", Point::new(1.0, 1.0)), None)
            .unwrap();
        store
            .create_note(1, &Note::new("n", NoteKind::Text, Point::new(1.0, 1.0), "t"))
            .unwrap();
        store.save_stroke(1, &red_stroke()).unwrap();
        store.save_stroke(1, &red_stroke()).unwrap();

        let kinds: Vec<(&str, Option<i64>)> = store.load_all().unwrap()[&1]
            .iter()
            .map(|a| match a {
                Annotation::Stroke(_) => ("stroke", a.ref_no()),
                Annotation::Note(_) => ("note", a.ref_no()),
                Annotation::CameraPin(_) => ("pin", a.ref_no()),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![("stroke", Some(2)), ("stroke", Some(3)), ("note", None), ("pin", Some(1))]
        );
    }

    #[test]
    fn test_record_export_appends_history() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();

        for (i, url) in ["https://x/1.pdf", "https://x/2.pdf"].iter().enumerate() {
            store
                .record_export(&ExportEntry {
                    url: url.to_string(),
                    exported_by: "u1".to_string(),
                    source_pdf_id: (i == 1).then(|| "pdf-9".to_string()),
                    exported_at: Utc::now(),
                })
                .unwrap();
        }

        let record = store.file_record().unwrap();
        assert_eq!(record.exported_pdf_url.as_deref(), Some("https://x/2.pdf"));
        assert_eq!(record.export_history.len(), 2);
        assert_eq!(record.export_history[0].url, "https://x/1.pdf");
        assert_eq!(record.export_history[1].source_pdf_id.as_deref(), Some("pdf-9"));
        assert!(exported_urls(&db).unwrap().contains("https://x/1.pdf"));
    }

    #[test]
    fn test_concurrent_stroke_saves_get_contiguous_refs() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_db(&temp_dir);
        let file_id = {
            let mut store = AnnotationStore::open(&db, &plan_source(), None).unwrap();
            store.save_stroke(1, &red_stroke()).unwrap();
            store.save_stroke(2, &red_stroke()).unwrap();
            store.file_id().clone()
        };

        const WRITERS: usize = 8;
        let barrier = Arc::new(Barrier::new(WRITERS));
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let db = db.clone();
                let file_id = file_id.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut store = AnnotationStore::attach(&db, &file_id)
                        .unwrap()
                        .with_max_attempts(500);
                    barrier.wait();
                    store.save_stroke(1 + (i as u32 % 3), &red_stroke()).unwrap().ref_no
                })
            })
            .collect();

        let mut refs: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        refs.sort_unstable();
        assert_eq!(refs, (3..=10).collect::<Vec<i64>>());

        let store = AnnotationStore::attach(&db, &file_id).unwrap();
        let total: usize = store.load_all().unwrap().values().map(Vec::len).sum();
        assert_eq!(total, 10);
    }
}

//! SQLite schema for the annotation store
//!
//! The layout mirrors the document hierarchy clients think in:
//! file -> page -> {strokes, notes, camera_pins}. Annotation rows keep
//! their payload as a JSON body next to the key columns.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per logical remote document
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            file_url TEXT NOT NULL,
            file_name TEXT NOT NULL,
            project_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            exported_pdf_url TEXT
        );

        -- Metadata sub-record, written once on first open
        CREATE TABLE IF NOT EXISTS file_meta (
            file_id TEXT PRIMARY KEY,
            canonical_source TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS export_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT NOT NULL,
            url TEXT NOT NULL,
            exported_by TEXT NOT NULL,
            source_pdf_id TEXT,
            exported_at INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        -- Every export object whose publish completed, with or without history
        CREATE TABLE IF NOT EXISTS published_exports (
            path TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            url TEXT NOT NULL,
            published_at INTEGER NOT NULL
        );

        -- Reference number counter, one per file
        CREATE TABLE IF NOT EXISTS counters (
            file_id TEXT PRIMARY KEY,
            value INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS pages (
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (file_id, page_number),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS strokes (
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            doc_id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (file_id, page_number, doc_id),
            FOREIGN KEY (file_id, page_number) REFERENCES pages(file_id, page_number) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS notes (
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            doc_id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (file_id, page_number, doc_id),
            FOREIGN KEY (file_id, page_number) REFERENCES pages(file_id, page_number) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS camera_pins (
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            doc_id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (file_id, page_number, doc_id),
            FOREIGN KEY (file_id, page_number) REFERENCES pages(file_id, page_number) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_export_history_file_id ON export_history(file_id);
        CREATE INDEX IF NOT EXISTS idx_export_history_url ON export_history(url);
        CREATE INDEX IF NOT EXISTS idx_files_project_id ON files(project_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

//! Data models for Drawmark
//!
//! Defines the file record, page record and the three annotation variants
//! (strokes, notes, camera pins). JSON field names are camelCase because the
//! same shapes travel over the HTTP surface and into stored annotation bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::FileId;

/// A point in page coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// Smallest rectangle containing every point (zero rect for no points)
    pub fn bounding(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }
}

/// One entry in a file's export history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    /// Durable download URL of the exported artifact
    pub url: String,
    /// User id of the caller who exported
    pub exported_by: String,
    /// Source PDF the export was produced from, when known
    pub source_pdf_id: Option<String>,
    pub exported_at: DateTime<Utc>,
}

/// Canonical server-side record of one logical remote document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    pub file_url: String,
    pub file_name: String,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Pointer to the most recent export
    pub exported_pdf_url: Option<String>,
    /// Oldest first
    pub export_history: Vec<ExportEntry>,
}

/// A page of a file that has received at least one annotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_number: u32,
    pub created_at: DateTime<Utc>,
}

/// A freehand stroke. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub ref_no: i64,
    pub page: u32,
    /// Packed 0xAARRGGBB
    pub color: u32,
    pub width: f32,
    pub tool_type: String,
    pub is_eraser: bool,
    pub points: Vec<Point>,
    pub pressure_values: Vec<f32>,
    pub bbox: Rect,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for a new stroke; ref number, page and timestamps are assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewStroke {
    #[serde(deserialize_with = "crate::records::deserialize_color")]
    pub color: u32,
    pub width: f32,
    #[serde(default = "default_tool_type")]
    pub tool_type: String,
    #[serde(default)]
    pub is_eraser: bool,
    pub points: Vec<Point>,
    #[serde(default)]
    pub pressure_values: Vec<f32>,
    #[serde(default)]
    pub author: Option<String>,
}

impl NewStroke {
    /// A pen stroke through the given points
    pub fn pen(color: u32, width: f32, points: Vec<Point>) -> Self {
        Self {
            color,
            width,
            tool_type: default_tool_type(),
            is_eraser: false,
            points,
            pressure_values: Vec::new(),
            author: None,
        }
    }
}

fn default_tool_type() -> String {
    "pen".to_string()
}

/// Kind of a note annotation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    #[default]
    Text,
    Sticky,
}

impl NoteKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(NoteKind::Text),
            "sticky" => Some(NoteKind::Sticky),
            _ => None,
        }
    }
}

/// A text box or sticky note, keyed by a caller-supplied id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub page: u32,
    pub ann_type: NoteKind,
    pub position: Point,
    pub text: String,
    pub color: u32,
    pub width: f32,
    pub height: f32,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Create a note at a position; page is set by the store on write
    pub fn new(id: impl Into<String>, ann_type: NoteKind, position: Point, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            page: 0,
            ann_type,
            position,
            text: text.into(),
            color: 0xFFFF_EB3B,
            width: 160.0,
            height: 120.0,
            author: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A photo pinned to a page position. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraPin {
    pub id: String,
    pub ref_no: i64,
    pub page: u32,
    pub position: Point,
    /// Remote image URL once uploaded, otherwise the capturing device's local path
    pub image_url: Option<String>,
    pub note: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller input for a new camera pin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCameraPin {
    pub id: String,
    pub position: Point,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl NewCameraPin {
    pub fn new(id: impl Into<String>, position: Point) -> Self {
        Self {
            id: id.into(),
            position,
            image_path: None,
            note: None,
            author: None,
        }
    }
}

/// Tagged union over the three annotation variants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Annotation {
    Stroke(Stroke),
    Note(Note),
    CameraPin(CameraPin),
}

impl Annotation {
    /// Reference number, for the variants that carry one
    pub fn ref_no(&self) -> Option<i64> {
        match self {
            Annotation::Stroke(s) => Some(s.ref_no),
            Annotation::Note(_) => None,
            Annotation::CameraPin(p) => Some(p.ref_no),
        }
    }
}

//! Defensive parsing of stored annotation documents
//!
//! Stored bodies are untrusted: they may have been written by older
//! clients, by hand, or be truncated. Each variant is parsed independently
//! with per-field coercion (numeric strings, `[x, y]` points, hex colours,
//! RFC 3339 or epoch-millisecond timestamps). Required fields that cannot be
//! coerced make the whole record invalid; optional ones fall back to defaults.
//!
//! The page number always comes from the row key, never the body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{CameraPin, Note, NoteKind, Point, Rect, Stroke};

/// Why a stored record was rejected
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("record body is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("invalid value for field '{0}'")]
    Invalid(&'static str),
}

type RecordResult<T> = Result<T, RecordError>;

const DEFAULT_NOTE_COLOR: u32 = 0xFFFF_EB3B;
const DEFAULT_NOTE_WIDTH: f32 = 160.0;
const DEFAULT_NOTE_HEIGHT: f32 = 120.0;

pub fn parse_stroke(page: u32, body: &Value) -> RecordResult<Stroke> {
    let obj = body.as_object().ok_or(RecordError::NotAnObject)?;

    let ref_no = required(obj, "refNo", integer).and_then(|n| {
        if n >= 1 {
            Ok(n)
        } else {
            Err(RecordError::Invalid("refNo"))
        }
    })?;
    let points = required(obj, "points", points)?;
    if points.is_empty() {
        return Err(RecordError::Invalid("points"));
    }
    let color = required(obj, "color", color)?;
    let width = required(obj, "width", number)? as f32;

    let pressure_values = obj
        .get("pressureValues")
        .and_then(|v| v.as_array())
        .map(|values| values.iter().filter_map(number).map(|n| n as f32).collect())
        .unwrap_or_default();

    let bbox = obj
        .get("bbox")
        .and_then(rect)
        .unwrap_or_else(|| Rect::bounding(&points));

    let (created_at, updated_at) = timestamps(obj);

    Ok(Stroke {
        ref_no,
        page,
        color,
        width,
        tool_type: optional(obj, "toolType", string).unwrap_or_else(|| "pen".to_string()),
        is_eraser: optional(obj, "isEraser", boolean).unwrap_or(false),
        points,
        pressure_values,
        bbox,
        author: optional(obj, "author", string),
        created_at,
        updated_at,
    })
}

pub fn parse_note(page: u32, doc_id: &str, body: &Value) -> RecordResult<Note> {
    let obj = body.as_object().ok_or(RecordError::NotAnObject)?;

    let id = optional(obj, "id", string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| doc_id.to_string());
    let position = required(obj, "position", point)?;
    let (created_at, updated_at) = timestamps(obj);

    Ok(Note {
        id,
        page,
        ann_type: optional(obj, "annType", string)
            .and_then(|s| NoteKind::parse(&s))
            .unwrap_or_default(),
        position,
        text: optional(obj, "text", string).unwrap_or_default(),
        color: optional(obj, "color", color).unwrap_or(DEFAULT_NOTE_COLOR),
        width: optional(obj, "width", number).map_or(DEFAULT_NOTE_WIDTH, |n| n as f32),
        height: optional(obj, "height", number).map_or(DEFAULT_NOTE_HEIGHT, |n| n as f32),
        author: optional(obj, "author", string),
        created_at,
        updated_at,
    })
}

pub fn parse_camera_pin(page: u32, doc_id: &str, body: &Value) -> RecordResult<CameraPin> {
    let obj = body.as_object().ok_or(RecordError::NotAnObject)?;

    let id = optional(obj, "id", string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| doc_id.to_string());
    let ref_no = required(obj, "refNo", integer)?;
    let position = required(obj, "position", point)?;
    let image_url = optional(obj, "imageUrl", string)
        .or_else(|| optional(obj, "imagePath", string))
        .filter(|s| !s.is_empty());
    let (created_at, _) = timestamps(obj);

    Ok(CameraPin {
        id,
        ref_no,
        page,
        position,
        image_url,
        note: optional(obj, "note", string).filter(|s| !s.is_empty()),
        author: optional(obj, "author", string),
        created_at,
    })
}

fn required<T>(obj: &Map<String, Value>, key: &'static str, coerce: fn(&Value) -> Option<T>) -> RecordResult<T> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(RecordError::Missing(key)),
        Some(value) => coerce(value).ok_or(RecordError::Invalid(key)),
    }
}

fn optional<T>(obj: &Map<String, Value>, key: &str, coerce: fn(&Value) -> Option<T>) -> Option<T> {
    obj.get(key).and_then(coerce)
}

/// `createdAt` defaults to `updatedAt` and vice versa; both missing gives the epoch
fn timestamps(obj: &Map<String, Value>) -> (DateTime<Utc>, DateTime<Utc>) {
    let created = optional(obj, "createdAt", timestamp);
    let updated = optional(obj, "updatedAt", timestamp);
    let created_at = created.or(updated).unwrap_or_default();
    (created_at, updated.unwrap_or(created_at))
}

pub(crate) fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

pub(crate) fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Packed ARGB; accepts integers (including sign-wrapped ones) and `#RRGGBB` / `#AARRGGBB`
pub(crate) fn color(value: &Value) -> Option<u32> {
    match value {
        Value::Number(_) => {
            let n = integer(value)?;
            if (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&n) {
                Some(n as u32)
            } else {
                None
            }
        }
        Value::String(s) => parse_color_str(s),
        _ => None,
    }
}

/// `deserialize_with` adapter applying the same color coercion to typed bodies
pub(crate) fn deserialize_color<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    color(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid color: {}", value)))
}

pub(crate) fn parse_color_str(raw: &str) -> Option<u32> {
    let s = raw.trim();
    let hex = s
        .strip_prefix('#')
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"));

    match hex {
        Some(h) if h.len() == 6 => u32::from_str_radix(h, 16).ok().map(|rgb| 0xFF00_0000 | rgb),
        Some(h) if h.len() == 8 => u32::from_str_radix(h, 16).ok(),
        Some(_) => None,
        None => color(&Value::from(s.parse::<i64>().ok()?)),
    }
}

fn point(value: &Value) -> Option<Point> {
    match value {
        Value::Object(obj) => Some(Point::new(
            number(obj.get("x")?)? as f32,
            number(obj.get("y")?)? as f32,
        )),
        Value::Array(items) if items.len() >= 2 => {
            Some(Point::new(number(&items[0])? as f32, number(&items[1])? as f32))
        }
        _ => None,
    }
}

/// All-or-nothing: one bad point invalidates the list
fn points(value: &Value) -> Option<Vec<Point>> {
    value.as_array()?.iter().map(point).collect()
}

fn rect(value: &Value) -> Option<Rect> {
    let obj = value.as_object()?;
    Some(Rect {
        x: number(obj.get("x")?)? as f32,
        y: number(obj.get("y")?)? as f32,
        width: number(obj.get("width")?)? as f32,
        height: number(obj.get("height")?)? as f32,
    })
}

/// RFC 3339 string, epoch milliseconds, or `{seconds, nanoseconds}`
pub fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| DateTime::from_timestamp_millis(s.trim().parse().ok()?)),
        Value::Number(_) => DateTime::from_timestamp_millis(integer(value)?),
        Value::Object(obj) => {
            let seconds = integer(obj.get("seconds")?)?;
            let nanos = obj.get("nanoseconds").and_then(integer).unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_well_formed_stroke() {
        let body = json!({
            "refNo": 3,
            "color": 4294901760u32,
            "width": 4,
            "toolType": "highlighter",
            "points": [{"x": 1, "y": 2}, {"x": 5, "y": 8}],
            "pressureValues": [0.5, 0.7],
            "author": "u1",
            "createdAt": "2026-10-18T09:30:00Z"
        });

        let stroke = parse_stroke(2, &body).unwrap();
        assert_eq!(stroke.ref_no, 3);
        assert_eq!(stroke.page, 2);
        assert_eq!(stroke.color, 0xFFFF_0000);
        assert_eq!(stroke.tool_type, "highlighter");
        assert_eq!(stroke.points.len(), 2);
        assert_eq!(stroke.bbox, Rect { x: 1.0, y: 2.0, width: 4.0, height: 6.0 });
        assert_eq!(stroke.updated_at, stroke.created_at);
    }

    #[test]
    fn test_stroke_coerces_fields() {
        let body = json!({
            "refNo": "7",
            "color": "#00ff00",
            "width": "2.5",
            "isEraser": "true",
            "points": [[0, 0], ["3", 4]],
            "pressureValues": [0.1, "bad", 0.3],
            "createdAt": 1760000000000i64
        });

        let stroke = parse_stroke(1, &body).unwrap();
        assert_eq!(stroke.ref_no, 7);
        assert_eq!(stroke.color, 0xFF00_FF00);
        assert_eq!(stroke.width, 2.5);
        assert!(stroke.is_eraser);
        assert_eq!(stroke.points[1], Point::new(3.0, 4.0));
        assert_eq!(stroke.pressure_values, vec![0.1, 0.3]);
        assert_eq!(stroke.created_at.timestamp_millis(), 1_760_000_000_000);
    }

    #[test]
    fn test_stroke_without_points_is_rejected() {
        let body = json!({"refNo": 1, "color": 1, "width": 2});
        assert_eq!(parse_stroke(1, &body), Err(RecordError::Missing("points")));

        let body = json!({"refNo": 1, "color": 1, "width": 2, "points": []});
        assert_eq!(parse_stroke(1, &body), Err(RecordError::Invalid("points")));

        let body = json!({"refNo": 1, "color": 1, "width": 2, "points": [{"x": 1}]});
        assert_eq!(parse_stroke(1, &body), Err(RecordError::Invalid("points")));
    }

    #[test]
    fn test_stroke_rejects_bad_ref_no() {
        let body = json!({"refNo": 0, "color": 1, "width": 2, "points": [[0, 0]]});
        assert_eq!(parse_stroke(1, &body), Err(RecordError::Invalid("refNo")));
    }

    #[test]
    fn test_non_object_body() {
        assert_eq!(parse_stroke(1, &json!("oops")), Err(RecordError::NotAnObject));
        assert_eq!(parse_note(1, "n", &json!([1, 2])), Err(RecordError::NotAnObject));
    }

    #[test]
    fn test_note_defaults_and_doc_id_fallback() {
        let note = parse_note(4, "note-7", &json!({"position": {"x": 10, "y": 20}})).unwrap();
        assert_eq!(note.id, "note-7");
        assert_eq!(note.page, 4);
        assert_eq!(note.ann_type, NoteKind::Text);
        assert_eq!(note.text, "");
        assert_eq!(note.color, DEFAULT_NOTE_COLOR);
        assert_eq!(note.width, DEFAULT_NOTE_WIDTH);
    }

    #[test]
    fn test_note_requires_position() {
        assert_eq!(
            parse_note(1, "n", &json!({"text": "floating"})),
            Err(RecordError::Missing("position"))
        );
    }

    #[test]
    fn test_camera_pin_accepts_image_path() {
        let pin = parse_camera_pin(
            1,
            "pin-1",
            &json!({"refNo": 2, "position": [5, 6], "imagePath": "/local/IMG_1.jpg", "note": ""}),
        )
        .unwrap();
        assert_eq!(pin.id, "pin-1");
        assert_eq!(pin.image_url.as_deref(), Some("/local/IMG_1.jpg"));
        assert!(pin.note.is_none());
    }

    #[test]
    fn test_color_forms() {
        assert_eq!(color(&json!(-65536)), Some(0xFFFF_0000));
        assert_eq!(color(&json!("#80FF0000")), Some(0x80FF_0000));
        assert_eq!(color(&json!("0x00ff00")), Some(0xFF00_FF00));
        assert_eq!(color(&json!("255")), Some(255));
        assert_eq!(color(&json!("#12345")), None);
        assert_eq!(color(&json!(1u64 << 40)), None);
        assert_eq!(color(&json!(true)), None);
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = DateTime::parse_from_rfc3339("2026-10-18T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(&json!("2026-10-18T00:00:00Z")), Some(expected));
        assert_eq!(timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            timestamp(&json!({"seconds": expected.timestamp(), "nanoseconds": 0})),
            Some(expected)
        );
        assert_eq!(timestamp(&json!("yesterday")), None);
    }
}

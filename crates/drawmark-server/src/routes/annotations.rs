//! Annotation store routes

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use drawmark_core::{
    CameraPin, DocumentSource, FileId, FileRecord, NewCameraPin, NewStroke, Note, PageAnnotations,
    Stroke, UploadedImage,
};

use super::{blocking, parse_json, parse_page};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFileBody {
    pub file_url: String,
    pub file_name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub override_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationsResponse {
    pub file_id: FileId,
    pub pages: PageAnnotations,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraPinBody {
    #[serde(flatten)]
    pub pin: NewCameraPin,
    /// Remote image URL, once the photo has been uploaded
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub path: String,
    pub content_type: String,
}

impl From<UploadedImage> for UploadResponse {
    fn from(image: UploadedImage) -> Self {
        Self {
            url: image.url,
            path: image.path,
            content_type: image.content_type,
        }
    }
}

pub async fn open_file(
    State(state): State<AppState>,
    _caller: Caller,
    body: Bytes,
) -> Result<Json<FileRecord>, ApiError> {
    let body: OpenFileBody = parse_json(&body)?;
    if body.file_url.trim().is_empty() && body.override_key.is_none() {
        return Err(ApiError::bad_request("fileUrl is required"));
    }

    blocking(move || {
        let mut source = DocumentSource::new(body.file_url, body.file_name);
        if let Some(key) = body.override_key {
            source = source.with_override_key(key);
        }
        let store = state.open_store(&source, body.project_id.as_deref())?;
        Ok(Json(store.file_record()?))
    })
    .await
}

pub async fn get_file(
    State(state): State<AppState>,
    _caller: Caller,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>, ApiError> {
    blocking(move || {
        let store = state.attach_store(&FileId::from_raw(file_id))?;
        Ok(Json(store.file_record()?))
    })
    .await
}

pub async fn load_annotations(
    State(state): State<AppState>,
    _caller: Caller,
    Path(file_id): Path<String>,
) -> Result<Json<AnnotationsResponse>, ApiError> {
    blocking(move || {
        let store = state.attach_store(&FileId::from_raw(file_id))?;
        Ok(Json(AnnotationsResponse {
            file_id: store.file_id().clone(),
            pages: store.load_all()?,
        }))
    })
    .await
}

pub async fn save_stroke(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path((file_id, page)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Stroke>), ApiError> {
    let page = parse_page(&page)?;
    let mut stroke: NewStroke = parse_json(&body)?;
    stroke.author.get_or_insert(user);

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        Ok((StatusCode::CREATED, Json(store.save_stroke(page, &stroke)?)))
    })
    .await
}

pub async fn create_note(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path((file_id, page)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    let page = parse_page(&page)?;
    let mut patch: Value = parse_json(&body)?;
    let id = patch
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("note id is required"))?;
    if let Some(obj) = patch.as_object_mut() {
        obj.entry("author").or_insert(Value::String(user));
    }

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        Ok((StatusCode::CREATED, Json(store.merge_note(page, &id, &patch)?)))
    })
    .await
}

pub async fn update_note(
    State(state): State<AppState>,
    _caller: Caller,
    Path((file_id, page, note_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Note>, ApiError> {
    let page = parse_page(&page)?;
    let patch: Value = parse_json(&body)?;

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        Ok(Json(store.merge_note(page, &note_id, &patch)?))
    })
    .await
}

pub async fn delete_note(
    State(state): State<AppState>,
    _caller: Caller,
    Path((file_id, page, note_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let page = parse_page(&page)?;

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        if store.delete_note(page, &note_id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found(format!("note '{}' not found", note_id)))
        }
    })
    .await
}

pub async fn save_camera_pin(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path((file_id, page)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<CameraPin>), ApiError> {
    let page = parse_page(&page)?;
    let mut body: CameraPinBody = parse_json(&body)?;
    body.pin.author.get_or_insert(user);

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        let pin = store.save_camera_pin(page, &body.pin, body.image_url.as_deref())?;
        Ok((StatusCode::CREATED, Json(pin)))
    })
    .await
}

pub async fn delete_camera_pin(
    State(state): State<AppState>,
    _caller: Caller,
    Path((file_id, page, pin_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let page = parse_page(&page)?;

    blocking(move || {
        let mut store = state.attach_store(&FileId::from_raw(file_id))?;
        if store.delete_camera_pin(page, &pin_id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found(format!("camera pin '{}' not found", pin_id)))
        }
    })
    .await
}

pub async fn upload_camera_image(
    State(state): State<AppState>,
    _caller: Caller,
    Path((file_id, page, pin_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let page = parse_page(&page)?;
    if body.is_empty() {
        return Err(ApiError::bad_request("image body is empty"));
    }

    blocking(move || {
        let store = state.attach_store(&FileId::from_raw(file_id))?;
        let uploaded = state
            .publisher
            .upload_camera_image(store.file_id(), page, &pin_id, &body)?;
        Ok((StatusCode::CREATED, Json(uploaded.into())))
    })
    .await
}

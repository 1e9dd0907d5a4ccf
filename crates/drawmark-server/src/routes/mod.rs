//! HTTP routes
//!
//! - `/api/files/...`: annotation store
//! - `/api/export`: report export
//! - `/v0/b/:bucket/o/*object`: token-protected blob downloads

use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::state::AppState;

pub mod annotations;
pub mod blobs;
pub mod export;

/// Routes that require a caller identity
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/files/open", post(annotations::open_file))
        .route("/api/files/:file_id", get(annotations::get_file))
        .route("/api/files/:file_id/annotations", get(annotations::load_annotations))
        .route("/api/files/:file_id/pages/:page/strokes", post(annotations::save_stroke))
        .route("/api/files/:file_id/pages/:page/notes", post(annotations::create_note))
        .route(
            "/api/files/:file_id/pages/:page/notes/:note_id",
            put(annotations::update_note).delete(annotations::delete_note),
        )
        .route("/api/files/:file_id/pages/:page/pins", post(annotations::save_camera_pin))
        .route(
            "/api/files/:file_id/pages/:page/pins/:pin_id",
            delete(annotations::delete_camera_pin),
        )
        .route(
            "/api/files/:file_id/pages/:page/pins/:pin_id/image",
            post(annotations::upload_camera_image),
        )
        .route("/api/export", post(export::export))
}

/// Download routes, authorized by object token instead of caller identity
pub fn blob_router() -> Router<AppState> {
    Router::new().route("/v0/b/:bucket/o/*object", get(blobs::download))
}

/// Run blocking store or blob work off the async runtime
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Parse a JSON body, answering 400 with the parser's message on failure
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

/// 1-based page number from a path segment
pub(crate) fn parse_page(raw: &str) -> Result<u32, ApiError> {
    match raw.parse::<u32>() {
        Ok(page) if page >= 1 => Ok(page),
        _ => Err(ApiError::bad_request(format!("invalid page number '{}'", raw))),
    }
}

//! Token-protected downloads of stored objects

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub alt: Option<String>,
}

pub async fn download(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    if query.alt.as_deref().is_some_and(|alt| alt != "media") {
        return Err(ApiError::bad_request("only alt=media is supported"));
    }

    let publisher = state.publisher.clone();
    let (bytes, meta) = blocking(move || Ok(publisher.download(&bucket, &object, &query.token)?)).await?;

    Ok(([(header::CONTENT_TYPE, meta.content_type)], bytes).into_response())
}

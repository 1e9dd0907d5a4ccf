//! Report export route
//!
//! decode pages -> fetch marker photos -> compose -> publish, answered with
//! the PDF itself plus its durable URL in `X-Export-Url`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use drawmark_core::records;
use drawmark_core::{compose, PhotoMarker, ProjectInfo, PublishRequest, RasterPage, ReportRequest};

use super::parse_json;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::fetch::{decode_data_url, ImageFetcher};
use crate::state::AppState;

const EXPORT_URL: &str = "x-export-url";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBody {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub pdf_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub project: Option<ProjectBody>,
    #[serde(default)]
    pub drawing_pages: Vec<DrawingPageBody>,
    #[serde(default)]
    pub photo_markers: Vec<PhotoMarkerBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub project_owner: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingPageBody {
    pub width: u32,
    pub height: u32,
    pub data_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMarkerBody {
    #[serde(default)]
    pub id: String,
    pub page: u32,
    #[serde(default)]
    pub ref_no: Option<i64>,
    /// Any timestamp shape the annotation store accepts
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ProjectBody {
    fn into_info(self, project_id: &str) -> ProjectInfo {
        ProjectInfo {
            id: non_blank(self.id).unwrap_or_else(|| project_id.to_string()),
            name: non_blank(self.name),
            client_name: non_blank(self.client_name),
            owner_name: non_blank(self.owner_name).or_else(|| non_blank(self.project_owner)),
            owner_email: non_blank(self.owner_email),
            description: non_blank(self.description),
            conclusion: non_blank(self.conclusion),
        }
    }
}

pub async fn export(
    State(state): State<AppState>,
    Caller(user): Caller,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: ExportBody = parse_json(&body)?;

    let project_id = non_blank(body.project_id).ok_or_else(|| ApiError::bad_request("projectId is required"))?;
    let project = body.project.ok_or_else(|| ApiError::bad_request("project is required"))?;
    if body.drawing_pages.is_empty() {
        return Err(ApiError::bad_request("drawingPages must not be empty"));
    }

    let mut pages = Vec::with_capacity(body.drawing_pages.len());
    for (index, page) in body.drawing_pages.into_iter().enumerate() {
        let data = decode_data_url(&page.data_url)
            .map_err(|e| ApiError::bad_request(format!("drawing page {} has an invalid dataUrl: {}", index + 1, e)))?;
        pages.push(RasterPage {
            width: page.width,
            height: page.height,
            data,
        });
    }

    let fetcher = ImageFetcher::new(
        state.http.clone(),
        state.publisher.clone(),
        state.config.max_image_fetch_bytes(),
    );
    let mut markers = Vec::with_capacity(body.photo_markers.len());
    for marker in body.photo_markers {
        markers.push(PhotoMarker {
            images: fetcher.resolve_all(&marker.image_urls).await,
            id: marker.id,
            page: marker.page,
            ref_no: marker.ref_no,
            note: non_blank(marker.note),
            created_at: marker.created_at.as_ref().and_then(records::timestamp),
        });
    }
    debug!("Export for project {}: {} pages, {} markers", project_id, pages.len(), markers.len());

    let request = ReportRequest {
        project: project.into_info(&project_id),
        file_name: body.file_name.clone().unwrap_or_default(),
        pages,
        markers,
    };
    let publish = PublishRequest {
        project_id,
        file_name: body.file_name,
        file_url: body.file_url,
        exported_by: user,
        source_pdf_id: body.pdf_id,
    };

    let publisher = state.publisher.clone();
    let published = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let pdf = compose(&request)?;
        Ok(publisher.publish(pdf, &publish)?)
    })
    .await??;

    info!("Exported {} for {}", published.path, published.file_name);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    let disposition = format!("attachment; filename=\"{}\"", published.file_name);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_bytes(disposition.as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"report.pdf\"")),
    );
    let url = HeaderValue::from_str(&published.url).map_err(|e| ApiError::internal(e.to_string()))?;
    headers.insert(HeaderName::from_static(EXPORT_URL), url);

    Ok((headers, published.bytes).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Method;
    use lopdf::Document;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use drawmark_core::{AnnotationStore, DocumentSource};

    use crate::test_support::*;

    const FILE_URL: &str = "https://firebasestorage.googleapis.com/v0/b/site-plans.appspot.com/o/project_files%2FP1%2Fplan.pdf?alt=media&token=AAA";

    fn export_body(pages: Vec<Value>, markers: Vec<Value>) -> Value {
        json!({
            "projectId": "P1",
            "pdfId": "pdf-9",
            "fileName": "Level 2 Plan.pdf",
            "fileUrl": FILE_URL,
            "project": {"id": "P1", "name": "Harbour Tower", "clientName": "Acme", "ownerName": "Sam"},
            "drawingPages": pages,
            "photoMarkers": markers,
        })
    }

    fn page_text(doc: &Document, page_number: u32) -> String {
        let page_id = doc.get_pages()[&page_number];
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    fn blob_objects(temp_dir: &TempDir) -> usize {
        let root = temp_dir.path().join("blobs").join("objects");
        if !root.exists() {
            return 0;
        }
        walk(&root)
    }

    fn walk(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path)
                } else {
                    1
                }
            })
            .sum()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_single_page_records_history() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 1200, "height": 800, "dataUrl": png_data_url(12, 8)});

        let response = send_json(&state, Method::POST, "/api/export", export_body(vec![page], vec![])).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"Level 2 Plan.pdf\""
        );
        let url = response.headers()["x-export-url"].to_str().unwrap().to_string();
        assert!(url.contains("/v0/b/"));
        assert!(url.contains("token="));

        let pdf = body_bytes(response).await;
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        let source = DocumentSource::new(FILE_URL, "Level 2 Plan.pdf");
        let store = AnnotationStore::open(&state.db, &source, None).unwrap();
        let record = store.file_record().unwrap();
        assert_eq!(record.exported_pdf_url.as_deref(), Some(url.as_str()));
        assert_eq!(record.export_history.len(), 1);
        assert_eq!(record.export_history[0].exported_by, USER);
        assert_eq!(record.export_history[0].source_pdf_id.as_deref(), Some("pdf-9"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_unreachable_photo_still_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 800, "height": 1200, "dataUrl": png_data_url(8, 12)});
        let marker = json!({
            "id": "pin-1",
            "page": 1,
            "refNo": 3,
            "createdAt": "2024-05-01T09:30:00Z",
            "note": "Cracked tile",
            "imageUrls": ["http://127.0.0.1:1/missing.jpg"],
        });

        let response = send_json(&state, Method::POST, "/api/export", export_body(vec![page], vec![marker])).await;
        assert_eq!(response.status(), 200);
        let doc = Document::load_mem(&body_bytes(response).await).unwrap();
        assert_eq!(doc.get_pages().len(), 2);

        let appendix = page_text(&doc, 2);
        assert!(appendix.contains("[image unavailable]"));
        assert!(appendix.contains("Ref 3"));
        assert!(appendix.contains("Cracked tile"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_long_non_ascii_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 10, "height": 10, "dataUrl": png_data_url(10, 10)});
        let mut body = export_body(vec![page], vec![]);
        body["fileName"] = json!("図面".repeat(60));

        let response = send_json(&state, Method::POST, "/api/export", body).await;
        assert_eq!(response.status(), 200);

        let disposition = String::from_utf8(response.headers()["content-disposition"].as_bytes().to_vec()).unwrap();
        assert!(disposition.starts_with("attachment; filename=\"図面"));
        assert!(disposition.ends_with(".pdf\""));

        let url = response.headers()["x-export-url"].to_str().unwrap().to_string();
        assert!(state.publisher.read_download_url(&url).unwrap().is_ok());
        assert_eq!(blob_objects(&temp_dir), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_keeps_export_without_history() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 10, "height": 10, "dataUrl": png_data_url(10, 10)});
        let mut body = export_body(vec![page], vec![]);
        body.as_object_mut().unwrap().remove("fileUrl");

        let response = send_json(&state, Method::POST, "/api/export", body).await;
        assert_eq!(response.status(), 200);

        let report = state.publisher.sweep_orphans(chrono::Duration::zero()).unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.deleted.is_empty());
        assert_eq!(blob_objects(&temp_dir), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_without_pages_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);

        let response = send_json(&state, Method::POST, "/api/export", export_body(vec![], vec![])).await;
        assert_eq!(response.status(), 400);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("drawingPages"));
        assert_eq!(blob_objects(&temp_dir), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_rejects_bad_requests() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 10, "height": 10, "dataUrl": png_data_url(10, 10)});

        let mut missing_project = export_body(vec![page.clone()], vec![]);
        missing_project.as_object_mut().unwrap().remove("projectId");
        let response = send_json(&state, Method::POST, "/api/export", missing_project).await;
        assert_eq!(response.status(), 400);

        let bad_data = json!({"width": 10, "height": 10, "dataUrl": "data:image/png,raw"});
        let response = send_json(&state, Method::POST, "/api/export", export_body(vec![bad_data], vec![])).await;
        assert_eq!(response.status(), 400);

        let response = send(&state, Method::POST, "/api/export", Some(bearer(&state)), Body::from("{")).await;
        assert_eq!(response.status(), 400);

        let response = send(&state, Method::POST, "/api/export", None, Body::from(export_body(vec![page], vec![]).to_string())).await;
        assert_eq!(response.status(), 401);

        assert_eq!(blob_objects(&temp_dir), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_without_file_url_skips_history() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let page = json!({"width": 10, "height": 10, "dataUrl": png_data_url(10, 10)});
        let mut body = export_body(vec![page], vec![]);
        body.as_object_mut().unwrap().remove("fileUrl");
        body.as_object_mut().unwrap().remove("fileName");

        let response = send_json(&state, Method::POST, "/api/export", body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(blob_objects(&temp_dir), 1);
    }
}

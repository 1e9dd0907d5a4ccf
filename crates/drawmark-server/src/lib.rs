//! Drawmark server
//!
//! HTTP surface over `drawmark-core`: annotation persistence, report export
//! and token-protected downloads of stored objects.

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod fetch;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let max_body = state.config.max_body_bytes();

    Router::new()
        .merge(routes::api_router())
        .merge(routes::blob_router())
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, Response};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use drawmark_core::Config;

    use super::*;

    pub const USER: &str = "user-1";

    pub fn state(temp_dir: &TempDir) -> AppState {
        let mut config = Config::with_data_dir(temp_dir.path());
        config.auth_secret = Some("test-secret".to_string());
        config.image_fetch_timeout_secs = 2;
        AppState::new(config).unwrap()
    }

    pub fn bearer(state: &AppState) -> String {
        format!("Bearer {}", state.auth.mint(USER))
    }

    pub fn png_data_url(width: u32, height: u32) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb([240, 240, 240]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    /// Send one request through a fresh router
    pub async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        auth: Option<String>,
        body: Body,
    ) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        app(state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn send_json(
        state: &AppState,
        method: Method,
        uri: &str,
        body: serde_json::Value,
    ) -> Response<Body> {
        send(state, method, uri, Some(bearer(state)), Body::from(body.to_string())).await
    }

    pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }
}

//! HTTP error responses
//!
//! Every failure leaves the server as `{"error": "<message>"}` with a
//! status code derived from the underlying error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use drawmark_core::{BlobError, ComposeError, PublishError, StoreError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::FileNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::DuplicatePin(_) => StatusCode::CONFLICT,
            StoreError::InvalidPage(_) | StoreError::InvalidAnnotation(_) => StatusCode::BAD_REQUEST,
            StoreError::AllocatorExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ComposeError> for ApiError {
    fn from(err: ComposeError) -> Self {
        let status = match &err {
            ComposeError::NoPages | ComposeError::MissingProject | ComposeError::InvalidPage { .. } => {
                StatusCode::BAD_REQUEST
            }
            ComposeError::Image(_) | ComposeError::Pdf(_) | ComposeError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Store(e) => e.into(),
            PublishError::MissingProject | PublishError::UnsupportedImage => {
                Self::bad_request(err.to_string())
            }
            PublishError::NotFound(_) | PublishError::Blob(BlobError::NotFound(_)) => {
                Self::not_found(err.to_string())
            }
            PublishError::InvalidToken => Self::new(StatusCode::FORBIDDEN, err.to_string()),
            PublishError::Blob(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawmark_core::FileId;

    #[test]
    fn test_store_error_status() {
        let cases = [
            (StoreError::FileNotFound(FileId::from_raw("x")), StatusCode::NOT_FOUND),
            (StoreError::DuplicatePin("p".to_string()), StatusCode::CONFLICT),
            (StoreError::InvalidPage(0), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_compose_error_status() {
        assert_eq!(ApiError::from(ComposeError::NoPages).status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(ComposeError::InvalidPage {
                page: 1,
                reason: "bad".to_string()
            })
            .status,
            StatusCode::BAD_REQUEST
        );
        let io = std::io::Error::new(std::io::ErrorKind::WriteZero, "short write");
        assert_eq!(
            ApiError::from(ComposeError::Io(io)).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_publish_error_status() {
        assert_eq!(ApiError::from(PublishError::InvalidToken).status, StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(PublishError::Store(StoreError::InvalidPage(0))).status,
            StatusCode::BAD_REQUEST
        );
    }
}

//! Image references
//!
//! Drawing pages arrive as `data:` URLs. Marker photos may be `data:` URLs,
//! download URLs minted by this server (read straight from the blob store)
//! or arbitrary `http(s)` URLs. A photo that cannot be loaded, or a remote
//! photo larger than the configured cap, degrades to
//! `MarkerImage::Unavailable` for that photo only.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, warn};

use drawmark_core::{MarkerImage, PublishError, Publisher};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("malformed data URL")]
    InvalidDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported image reference")]
    UnsupportedScheme,

    #[error("image too large")]
    TooLarge,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stored object unavailable: {0}")]
    Stored(#[from] PublishError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Decode a `data:[<mime>][;base64],<payload>` URL
///
/// Only base64 payloads are accepted; raster data is never percent-encoded.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, FetchError> {
    let rest = url.trim().strip_prefix("data:").ok_or(FetchError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(FetchError::InvalidDataUrl)?;
    if !header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(FetchError::InvalidDataUrl);
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(payload)?)
}

/// Loads marker photos from any supported reference
#[derive(Clone)]
pub struct ImageFetcher {
    http: reqwest::Client,
    publisher: Arc<Publisher>,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(http: reqwest::Client, publisher: Arc<Publisher>, max_bytes: usize) -> Self {
        Self {
            http,
            publisher,
            max_bytes,
        }
    }

    /// Load one photo; failures become an unavailable image
    pub async fn resolve(&self, reference: &str) -> MarkerImage {
        match self.load(reference).await {
            Ok(bytes) => MarkerImage::Bytes(bytes),
            Err(e) => {
                warn!("Photo {} unavailable: {}", truncate_reference(reference), e);
                MarkerImage::Unavailable {
                    source: truncate_reference(reference),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Load every photo of a marker, in order
    pub async fn resolve_all(&self, references: &[String]) -> Vec<MarkerImage> {
        let mut images = Vec::with_capacity(references.len());
        for reference in references {
            images.push(self.resolve(reference).await);
        }
        images
    }

    async fn load(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let reference = reference.trim();
        if reference.starts_with("data:") {
            return decode_data_url(reference);
        }

        let publisher = Arc::clone(&self.publisher);
        let owned = reference.to_string();
        let stored = tokio::task::spawn_blocking(move || publisher.read_download_url(&owned)).await?;
        if let Some(result) = stored {
            debug!("Reading photo from local blob store");
            return Ok(result?);
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.fetch_remote(reference).await;
        }

        Err(FetchError::UnsupportedScheme)
    }

    /// Download a remote photo, giving up once it passes `max_bytes`
    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(FetchError::TooLarge);
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

/// Keep huge data URLs out of logs and captions
fn truncate_reference(reference: &str) -> String {
    const MAX: usize = 96;
    if reference.chars().count() <= MAX {
        reference.to_string()
    } else {
        format!("{}...", reference.chars().take(MAX).collect::<String>())
    }
}

//! Shared server state

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use drawmark_core::{AnnotationStore, Config, Database, DocumentSource, FileId, Publisher, StoreError};

use crate::auth::CallerAuth;

/// State handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub publisher: Arc<Publisher>,
    pub auth: Arc<CallerAuth>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Open the database and blob store described by the configuration
    pub fn new(config: Config) -> Result<Self> {
        let secret = config
            .auth_secret
            .clone()
            .filter(|s| !s.is_empty())
            .context("auth_secret is not configured. Set it with: drawmark config set auth_secret <value>")?;

        let auth = CallerAuth::new(&secret).map_err(|e| anyhow::anyhow!("Invalid auth_secret: {}", e))?;

        let db = Database::open(&config).context("Failed to open annotation database")?;
        let publisher = Publisher::from_config(&config, db.clone());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.image_fetch_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config: Arc::new(config),
            db,
            publisher: Arc::new(publisher),
            auth: Arc::new(auth),
            http,
        })
    }

    /// Open the annotation store for a document, creating its record on first use
    pub fn open_store(&self, source: &DocumentSource, project_id: Option<&str>) -> Result<AnnotationStore, StoreError> {
        Ok(AnnotationStore::open(&self.db, source, project_id)?
            .with_max_attempts(self.config.allocator_max_attempts))
    }

    /// Attach to an existing file record
    pub fn attach_store(&self, file_id: &FileId) -> Result<AnnotationStore, StoreError> {
        Ok(AnnotationStore::attach(&self.db, file_id)?.with_max_attempts(self.config.allocator_max_attempts))
    }
}

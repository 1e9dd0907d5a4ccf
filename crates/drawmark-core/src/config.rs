//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/drawmark/config.toml)
//! 3. Environment variables (DRAWMARK_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "DRAWMARK";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db, blob objects)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL used when minting download links (defaults to http://<bind_addr>)
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Bucket name embedded in minted download links
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Secret used to verify caller identity tokens
    #[serde(default)]
    pub auth_secret: Option<String>,

    /// Maximum accepted request body, in megabytes
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,

    /// How many times a conflicting reference number allocation is retried
    #[serde(default = "default_allocator_max_attempts")]
    pub allocator_max_attempts: u32,

    /// Timeout for fetching remote photo images during export
    #[serde(default = "default_image_fetch_timeout_secs")]
    pub image_fetch_timeout_secs: u64,

    /// Largest remote photo fetched during export, in megabytes
    #[serde(default = "default_max_image_fetch_mb")]
    pub max_image_fetch_mb: usize,

    /// Log file path (defaults to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bind_addr: default_bind_addr(),
            public_base_url: None,
            bucket: default_bucket(),
            auth_secret: None,
            max_body_mb: default_max_body_mb(),
            allocator_max_attempts: default_allocator_max_attempts(),
            image_fetch_timeout_secs: default_image_fetch_timeout_secs(),
            max_image_fetch_mb: default_max_image_fetch_mb(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (DRAWMARK_DATA_DIR, DRAWMARK_BIND_ADDR, ...)
    /// 2. Config file (~/.config/drawmark/config.toml or DRAWMARK_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted at a specific data directory, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BIND_ADDR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.bind_addr = val;
            }
        }

        // Empty string clears it
        if let Ok(val) = std::env::var(format!("{}_PUBLIC_BASE_URL", ENV_PREFIX)) {
            self.public_base_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_BUCKET", ENV_PREFIX)) {
            if !val.is_empty() {
                self.bucket = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_AUTH_SECRET", ENV_PREFIX)) {
            self.auth_secret = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_MAX_BODY_MB", ENV_PREFIX)) {
            if let Ok(mb) = val.parse() {
                self.max_body_mb = mb;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_ALLOCATOR_MAX_ATTEMPTS", ENV_PREFIX)) {
            if let Some(attempts) = val.parse::<u32>().ok().filter(|&n| n > 0) {
                self.allocator_max_attempts = attempts;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_IMAGE_FETCH_TIMEOUT_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.image_fetch_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_MAX_IMAGE_FETCH_MB", ENV_PREFIX)) {
            if let Ok(mb) = val.parse() {
                self.max_image_fetch_mb = mb;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with DRAWMARK_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drawmark")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("drawmark.db")
    }

    /// Get the root directory of the blob store
    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Base URL for minted download links, without a trailing slash
    pub fn public_base_url(&self) -> String {
        let base = self
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind_addr));
        base.trim_end_matches('/').to_string()
    }

    /// Maximum request body in bytes
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }

    /// Maximum remote photo size in bytes
    pub fn max_image_fetch_bytes(&self) -> usize {
        self.max_image_fetch_mb.saturating_mul(1024 * 1024)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drawmark")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_bucket() -> String {
    "drawmark-local".to_string()
}

fn default_max_body_mb() -> usize {
    64
}

fn default_allocator_max_attempts() -> u32 {
    64
}

fn default_image_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_image_fetch_mb() -> usize {
    20
}

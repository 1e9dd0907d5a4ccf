//! Tracing setup
//!
//! Filter comes from `DRAWMARK_LOG`, then `RUST_LOG`, then a default that
//! logs both crates and request traces at info. Output goes to the configured
//! log file, or stderr when none is set.

use std::fs::OpenOptions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use drawmark_core::Config;

const DEFAULT_FILTER: &str = "drawmark_core=info,drawmark_server=info,drawmark=info,tower_http=info";

fn env_filter() -> EnvFilter {
    std::env::var("DRAWMARK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging (ignored if already initialized)
pub fn init(config: &Config) {
    if let Some(log_path) = &config.log_file {
        let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                return init_stderr();
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .with_ansi(false)
            .with_writer(log_file)
            .try_init();

        info!("Logging to {:?}", log_path);
        return;
    }

    init_stderr();
}

fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

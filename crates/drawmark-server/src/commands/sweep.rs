//! Sweep command handler

use anyhow::{bail, Context, Result};
use tracing::info;

use drawmark_core::{Config, Database, Publisher};

use crate::output::Output;

/// Delete export objects that no file's history references
pub fn sweep(config: &Config, older_than_hours: i64, output: &Output) -> Result<()> {
    if older_than_hours < 0 {
        bail!("--older-than-hours cannot be negative");
    }

    let db = Database::open(config).context("Failed to open annotation database")?;
    let publisher = Publisher::from_config(config, db);
    let report = publisher
        .sweep_orphans(chrono::Duration::hours(older_than_hours))
        .context("Sweep failed")?;

    info!(
        "Sweep scanned {} exports, removed {}",
        report.scanned,
        report.deleted.len()
    );
    output.print_sweep(&report);
    Ok(())
}

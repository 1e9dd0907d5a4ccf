//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use drawmark_core::SweepReport;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a minted caller token
    pub fn print_token(&self, user_id: &str, token: &str) {
        match self.format {
            OutputFormat::Human => {
                println!("Caller token for {}:", user_id);
                println!();
                println!("  Authorization: Bearer {}", token);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"user_id": user_id, "token": token})
                );
            }
            OutputFormat::Quiet => println!("{}", token),
        }
    }

    /// Print the outcome of an orphan sweep
    pub fn print_sweep(&self, report: &SweepReport) {
        match self.format {
            OutputFormat::Human => {
                for path in &report.deleted {
                    println!("  removed {}", truncate(path, 100));
                }
                println!(
                    "\nScanned {} export(s), removed {} orphan(s)",
                    report.scanned,
                    report.deleted.len()
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"scanned": report.scanned, "deleted": report.deleted})
                );
            }
            OutputFormat::Quiet => {
                for path in &report.deleted {
                    println!("{}", path);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    }
}

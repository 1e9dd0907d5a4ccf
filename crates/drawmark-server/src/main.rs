//! Drawmark CLI
//!
//! Runs the Drawmark HTTP server and its maintenance commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use drawmark_core::Config;

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "drawmark")]
#[command(about = "Drawmark - drawing annotations and PDF report exports")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind (overrides bind_addr)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Mint a caller identity token
    Token {
        /// User id the token identifies
        user_id: String,
    },
    /// Remove exported reports that no file history references
    Sweep {
        /// Only remove exports older than this many hours
        #[arg(long, default_value_t = 24)]
        older_than_hours: i64,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, bind_addr, bucket, auth_secret, ...)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config_file.as_ref();

    // Config commands work without a usable configuration
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config = Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config);

    match cli.command {
        Commands::Serve { bind } => commands::serve::serve(config, bind, &output).await,
        Commands::Token { user_id } => commands::token::mint(&config, user_id, &output),
        Commands::Sweep { older_than_hours } => {
            commands::sweep::sweep(&config, older_than_hours, &output)
        }
        Commands::Config { command } => handle_config_command(command, config_path, &output),
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
        Some(ConfigCommands::Path) => commands::config::path(config_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sweep_defaults() {
        let cli = Cli::try_parse_from(["drawmark", "sweep"]).unwrap();
        assert!(matches!(cli.command, Commands::Sweep { older_than_hours: 24 }));

        let cli = Cli::try_parse_from(["drawmark", "--json", "token", "user-1"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Token { ref user_id } if user_id == "user-1"));
    }
}

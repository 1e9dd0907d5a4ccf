//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use drawmark_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, bind_addr, public_base_url, bucket, auth_secret, max_body_mb, \
                    allocator_max_attempts, image_fetch_timeout_secs, max_image_fetch_mb, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let secret = if config.auth_secret.is_some() { "(set)" } else { "(not set)" };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "bind_addr": config.bind_addr,
                    "public_base_url": config.public_base_url(),
                    "bucket": config.bucket,
                    "auth_secret_set": config.auth_secret.is_some(),
                    "max_body_mb": config.max_body_mb,
                    "allocator_max_attempts": config.allocator_max_attempts,
                    "image_fetch_timeout_secs": config.image_fetch_timeout_secs,
                    "max_image_fetch_mb": config.max_image_fetch_mb,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path.cloned().unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:                 {}", config.data_dir.display());
            println!("  bind_addr:                {}", config.bind_addr);
            println!("  public_base_url:          {}", config.public_base_url());
            println!("  bucket:                   {}", config.bucket);
            println!("  auth_secret:              {}", secret);
            println!("  max_body_mb:              {}", config.max_body_mb);
            println!("  allocator_max_attempts:   {}", config.allocator_max_attempts);
            println!("  image_fetch_timeout_secs: {}", config.image_fetch_timeout_secs);
            println!("  max_image_fetch_mb:       {}", config.max_image_fetch_mb);
            println!(
                "  log_file:                 {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(stderr)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Print the config file path
pub fn path(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_path.cloned().unwrap_or_else(Config::config_file_path);
    println!("{}", path.display());
    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config = Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;

    let save_path = config_path.cloned().unwrap_or_else(Config::config_file_path);
    config.save_to_path(&save_path).context("Failed to save configuration")?;

    let shown = if key == "auth_secret" { "********" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "bind_addr" => {
            if value.is_empty() {
                bail!("bind_addr cannot be empty");
            }
            config.bind_addr = value.to_string();
        }
        "public_base_url" => config.public_base_url = optional(value),
        "bucket" => {
            if value.is_empty() {
                bail!("bucket cannot be empty");
            }
            config.bucket = value.to_string();
        }
        "auth_secret" => config.auth_secret = optional(value),
        "max_body_mb" => {
            config.max_body_mb = value
                .parse()
                .context("Invalid value for max_body_mb. Use a whole number of megabytes.")?;
        }
        "allocator_max_attempts" => {
            let attempts: u32 = value
                .parse()
                .context("Invalid value for allocator_max_attempts. Use a positive number.")?;
            if attempts == 0 {
                bail!("allocator_max_attempts must be at least 1");
            }
            config.allocator_max_attempts = attempts;
        }
        "image_fetch_timeout_secs" => {
            config.image_fetch_timeout_secs = value
                .parse()
                .context("Invalid value for image_fetch_timeout_secs. Use a number of seconds.")?;
        }
        "max_image_fetch_mb" => {
            config.max_image_fetch_mb = value
                .parse()
                .context("Invalid value for max_image_fetch_mb. Use a whole number of megabytes.")?;
        }
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!("Unknown configuration key: '{}'\nValid keys: {}", key, KEYS);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::with_data_dir("/tmp/drawmark");
        apply(&mut config, "bucket", "site-reports").unwrap();
        apply(&mut config, "max_body_mb", "64").unwrap();
        apply(&mut config, "public_base_url", "https://reports.example.com").unwrap();
        apply(&mut config, "log_file", "none").unwrap();
        apply(&mut config, "max_image_fetch_mb", "5").unwrap();

        assert_eq!(config.bucket, "site-reports");
        assert_eq!(config.max_body_mb, 64);
        assert_eq!(config.public_base_url(), "https://reports.example.com");
        assert!(config.log_file.is_none());
        assert_eq!(config.max_image_fetch_mb, 5);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::with_data_dir("/tmp/drawmark");
        assert!(apply(&mut config, "max_body_mb", "lots").is_err());
        assert!(apply(&mut config, "allocator_max_attempts", "0").is_err());
        assert!(apply(&mut config, "sync_url", "ws://x").is_err());
    }

    #[test]
    fn test_set_writes_config_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);
        std::fs::write(&path, format!("data_dir = {:?}\n", temp_dir.path().join("data"))).unwrap();

        set("auth_secret".to_string(), "s3cret".to_string(), Some(&path), &output).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("auth_secret = \"s3cret\""));
    }
}

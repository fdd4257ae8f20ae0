//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use codesync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "project_dir": config.project_dir,
                    "port": config.port,
                    "bind_address": config.bind_address,
                    "confirm_deletes": config.confirm_deletes,
                    "remote_drift_ms": config.remote_drift_ms,
                    "delete_echo_ttl_ms": config.delete_echo_ttl_ms,
                    "log_level": config.log_level,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.project_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  project_dir:        {}", config.project_dir.display());
            println!("  port:               {}", config.port);
            println!("  bind_address:       {}", config.bind_address);
            println!("  confirm_deletes:    {}", config.confirm_deletes);
            println!("  remote_drift_ms:    {}", config.remote_drift_ms);
            println!("  delete_echo_ttl_ms: {}", config.delete_echo_ttl_ms);
            println!("  log_level:          {}", config.log_level);
            println!(
                "  log_file:           {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;

    match config_path {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
    .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

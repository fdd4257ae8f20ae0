//! Tracing setup for the daemon

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use codesync_core::Config;

/// Environment variable that overrides the configured log level
const LOG_ENV: &str = "CODESYNC_LOG";

/// Filter directive for both codesync crates at one level
fn filter_directive(level: &str) -> String {
    format!("codesync_core={},codesync_cli={}", level, level)
}

/// Install the global subscriber
///
/// Logs go to `config.log_file` when set, otherwise to stderr.
pub fn init(config: &Config) -> Result<()> {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| config.log_level.clone());
    let env_filter = EnvFilter::new(filter_directive(&level));

    match config.log_file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open log file {:?}", path))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_covers_both_crates() {
        assert_eq!(
            filter_directive("debug"),
            "codesync_core=debug,codesync_cli=debug"
        );
    }
}

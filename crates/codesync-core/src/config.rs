//! Daemon configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/codesync/config.toml)
//! 3. Environment variables (CODESYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "CODESYNC";

/// Default port the plugin connects to
pub const DEFAULT_PORT: u16 = 18163;

/// Directory (inside the project) holding synced source files
const FILES_DIR: &str = "files";

/// Directory (inside the project) holding daemon bookkeeping
const STATE_DIR: &str = ".codesync";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project root; synced files live under `<project_dir>/files`
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Port the WebSocket server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the WebSocket server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Ask the plugin to confirm deletes that originate on disk
    #[serde(default = "default_true")]
    pub confirm_deletes: bool,

    /// Tolerance for clock/propagation skew when judging "remote unchanged"
    #[serde(default = "default_remote_drift_ms")]
    pub remote_drift_ms: u64,

    /// How long a remote-initiated delete suppresses the matching watcher event
    #[serde(default = "default_delete_echo_ttl_ms")]
    pub delete_echo_ttl_ms: u64,

    /// Log level for the daemon (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            port: default_port(),
            bind_address: default_bind_address(),
            confirm_deletes: true,
            remote_drift_ms: default_remote_drift_ms(),
            delete_echo_ttl_ms: default_delete_echo_ttl_ms(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (CODESYNC_PROJECT_DIR, CODESYNC_PORT, ...)
    /// 2. Config file (~/.config/codesync/config.toml or CODESYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, honoring an explicit `--config` path if given
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_PROJECT_DIR", ENV_PREFIX)) {
            self.project_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_PORT", ENV_PREFIX)) {
            match val.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}_PORT value: {}", ENV_PREFIX, val),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_BIND_ADDRESS", ENV_PREFIX)) {
            if !val.is_empty() {
                self.bind_address = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_CONFIRM_DELETES", ENV_PREFIX)) {
            self.confirm_deletes = val.eq_ignore_ascii_case("true") || val == "1";
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_DRIFT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.remote_drift_ms = ms;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
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

    /// Set a single value by key, as used by `codesync config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "project_dir" => self.project_dir = PathBuf::from(value),
            "port" => {
                self.port = value
                    .parse()
                    .with_context(|| format!("Invalid port: {}", value))?;
            }
            "bind_address" => self.bind_address = value.to_string(),
            "confirm_deletes" => {
                self.confirm_deletes = value.eq_ignore_ascii_case("true") || value == "1";
            }
            "remote_drift_ms" => {
                self.remote_drift_ms = value
                    .parse()
                    .with_context(|| format!("Invalid remote_drift_ms: {}", value))?;
            }
            "delete_echo_ttl_ms" => {
                self.delete_echo_ttl_ms = value
                    .parse()
                    .with_context(|| format!("Invalid delete_echo_ttl_ms: {}", value))?;
            }
            "log_level" => self.log_level = value.to_string(),
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            _ => anyhow::bail!(
                "Unknown config key '{}'. Valid keys: project_dir, port, bind_address, \
                 confirm_deletes, remote_drift_ms, delete_echo_ttl_ms, log_level, log_file",
                key
            ),
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
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
    /// Can be overridden with CODESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codesync")
            .join("config.toml")
    }

    /// Directory holding the synced source files
    pub fn files_dir(&self) -> PathBuf {
        self.project_dir.join(FILES_DIR)
    }

    /// Path to the persisted sync state document
    pub fn state_file_path(&self) -> PathBuf {
        self.project_dir.join(STATE_DIR).join("sync-state.json")
    }

    /// Socket address for the WebSocket server
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.bind_address, self.port
                )
            })
    }

    pub fn remote_drift(&self) -> Duration {
        Duration::from_millis(self.remote_drift_ms)
    }

    pub fn delete_echo_ttl(&self) -> Duration {
        Duration::from_millis(self.delete_echo_ttl_ms)
    }
}

fn default_project_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_remote_drift_ms() -> u64 {
    2000
}

fn default_delete_echo_ttl_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "CODESYNC_PROJECT_DIR",
        "CODESYNC_PORT",
        "CODESYNC_BIND_ADDRESS",
        "CODESYNC_CONFIRM_DELETES",
        "CODESYNC_REMOTE_DRIFT_MS",
        "CODESYNC_LOG_LEVEL",
        "CODESYNC_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.confirm_deletes);
        assert_eq!(config.remote_drift(), Duration::from_millis(2000));
        assert_eq!(config.delete_echo_ttl(), Duration::from_secs(5));
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            project_dir: PathBuf::from("/work/site"),
            ..Config::default()
        };

        assert_eq!(config.files_dir(), PathBuf::from("/work/site/files"));
        assert!(config.state_file_path().ends_with(".codesync/sync-state.json"));
        assert!(config.state_file_path().starts_with("/work/site"));
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default();
        let addr = config.listen_addr().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
        assert!(addr.ip().is_loopback());

        let bad = Config {
            bind_address: "not an address".to_string(),
            ..Config::default()
        };
        assert!(bad.listen_addr().is_err());
    }

    #[test]
    fn test_env_override_project_dir_and_port() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("CODESYNC_PROJECT_DIR", "/tmp/codesync-test");
        env::set_var("CODESYNC_PORT", "4000");
        config.apply_env_overrides();

        assert_eq!(config.project_dir, PathBuf::from("/tmp/codesync-test"));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_env_override_invalid_port_is_ignored() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("CODESYNC_PORT", "not-a-port");
        config.apply_env_overrides();

        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_env_override_confirm_deletes() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("CODESYNC_CONFIRM_DELETES", "false");
        config.apply_env_overrides();
        assert!(!config.confirm_deletes);

        env::set_var("CODESYNC_CONFIRM_DELETES", "1");
        config.apply_env_overrides();
        assert!(config.confirm_deletes);
    }

    #[test]
    fn test_env_override_log_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("CODESYNC_LOG_FILE", "/tmp/codesync.log");
        config.apply_env_overrides();
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/codesync.log")));

        // Empty string clears it
        env::set_var("CODESYNC_LOG_FILE", "");
        config.apply_env_overrides();
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            project_dir = "/custom/project"
            port = 9001
            confirm_deletes = false
            remote_drift_ms = 500
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.project_dir, PathBuf::from("/custom/project"));
        assert_eq!(config.port, 9001);
        assert!(!config.confirm_deletes);
        assert_eq!(config.remote_drift_ms, 500);
        // Unspecified fields fall back to defaults
        assert_eq!(config.delete_echo_ttl_ms, 5000);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set_value("port", "7777").unwrap();
        config.set_value("log_level", "debug").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from_path(&path).unwrap();
        assert_eq!(reloaded.port, 7777);
        assert_eq!(reloaded.log_level, "debug");
    }

    #[test]
    fn test_set_value_rejects_unknown_key() {
        let mut config = Config::default();
        assert!(config.set_value("favorite_color", "blue").is_err());
        assert!(config.set_value("port", "seventy").is_err());
    }
}

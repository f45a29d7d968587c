//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/famsync/config.toml)
//! 3. Environment variables (FAMSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::sync::{ReconnectPolicy, SyncSettings, DEFAULT_TOPIC_PREFIX};

/// Environment variable prefix
const ENV_PREFIX: &str = "FAMSYNC";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Realtime endpoint (`wss://<project>/realtime/v1`)
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// Project API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Signed-in user whose channel to join
    #[serde(default)]
    pub user_id: Option<String>,

    /// Prefix of the per-user topic
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Tables to receive row-level change notifications for
    #[serde(default)]
    pub watched_tables: Vec<String>,

    /// Log file; logs go to stderr when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realtime_url: None,
            api_key: None,
            user_id: None,
            topic_prefix: default_topic_prefix(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            watched_tables: Vec::new(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FAMSYNC_REALTIME_URL, FAMSYNC_API_KEY, FAMSYNC_USER_ID)
    /// 2. Config file (~/.config/famsync/config.toml or FAMSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` when given (CLI `--config`), else the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
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
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides; an empty value clears the key
    fn apply_env_overrides(&mut self) {
        let read = |name: &str| {
            std::env::var(format!("{}_{}", ENV_PREFIX, name))
                .ok()
                .map(|val| if val.is_empty() { None } else { Some(val) })
        };

        if let Some(val) = read("REALTIME_URL") {
            self.realtime_url = val;
        }
        if let Some(val) = read("API_KEY") {
            self.api_key = val;
        }
        if let Some(val) = read("USER_ID") {
            self.user_id = val;
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
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
    /// Can be overridden with FAMSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("famsync")
            .join("config.toml")
    }

    /// Realtime endpoint, required to connect
    pub fn realtime_url(&self) -> Result<&str, SyncError> {
        self.realtime_url
            .as_deref()
            .ok_or(SyncError::MissingConfig { key: "realtime_url" })
    }

    /// User id, required to subscribe
    pub fn user_id(&self) -> Result<&str, SyncError> {
        self.user_id
            .as_deref()
            .ok_or(SyncError::MissingConfig { key: "user_id" })
    }

    /// API key, empty when unset
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or("")
    }

    /// Session settings derived from this configuration
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            policy: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.max_reconnect_attempts,
            },
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            topic_prefix: self.topic_prefix.clone(),
            watched_tables: self.watched_tables.clone(),
        }
    }
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

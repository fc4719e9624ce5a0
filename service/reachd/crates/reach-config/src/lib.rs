//! Unified configuration for the Reach broker daemon
//!
//! This crate is the single source of truth for daemon configuration:
//!
//! - Environment variables (`REACH_*` prefix)
//! - TOML configuration files
//! - Programmatic defaults (`development()` / `production()` / `testing()`)
//!
//! It also hosts the persisted per-account settings store (the typed K/V
//! surface holding the enabled-ability list and feature toggles) in
//! [`settings`].
//!
//! # Example
//!
//! ```rust,no_run
//! use reach_config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! println!("channel timeout: {} ms", config.broker.channel_timeout_ms);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod settings;

pub use settings::{
    keys, JsonFileSettings, MemorySettings, ObserverFn, ObserverId, SettingValue, SettingsStore,
};

/// Errors surfaced by configuration loading and the settings store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("setting {key} holds a {actual} value, not a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Result alias for this crate.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
}

/// Tunables of the connection broker itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Bounded wait for Channel operations, in milliseconds.
    pub channel_timeout_ms: u64,

    /// Capacity of the tree id pool. Tree ids are issued from `[1, capacity]`.
    pub tree_id_capacity: i32,

    /// Directory holding per-account persisted settings files.
    pub settings_dir: PathBuf,

    /// Account id activated at startup.
    pub initial_account: i32,
}

/// Logging configuration consumed by `reach-logging`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level / env-filter expression (error, warn, info, debug, trace).
    pub level: String,

    /// Emit structured JSON instead of human-readable lines.
    pub json_format: bool,

    /// Optional log file path; stderr when absent.
    pub log_file: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            channel_timeout_ms: 5000,
            tree_id_capacity: 8191,
            settings_dir: PathBuf::from("/data/service/reach"),
            initial_account: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json_format: true,
            log_file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::development()
    }
}

/// Builder for programmatic construction.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    channel_timeout_ms: Option<u64>,
    tree_id_capacity: Option<i32>,
    settings_dir: Option<PathBuf>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.channel_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_tree_id_capacity(mut self, capacity: i32) -> Self {
        self.tree_id_capacity = Some(capacity);
        self
    }

    pub fn with_settings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings_dir = Some(dir.into());
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn build(self) -> Config {
        let mut config = Config::development();
        if let Some(timeout) = self.channel_timeout_ms {
            config.broker.channel_timeout_ms = timeout;
        }
        if let Some(capacity) = self.tree_id_capacity {
            config.broker.tree_id_capacity = capacity;
        }
        if let Some(dir) = self.settings_dir {
            config.broker.settings_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        config
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults suitable for local development.
    pub fn development() -> Self {
        Config {
            broker: BrokerConfig::default(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                json_format: false,
                log_file: None,
            },
        }
    }

    /// Defaults for a system install.
    pub fn production() -> Self {
        Config {
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Defaults for tests: short timeouts, temp-friendly paths.
    pub fn testing() -> Self {
        Config {
            broker: BrokerConfig {
                channel_timeout_ms: 200,
                tree_id_capacity: 64,
                settings_dir: std::env::temp_dir().join("reach-tests"),
                initial_account: 100,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json_format: false,
                log_file: None,
            },
        }
    }

    /// Load from environment variables and, when `REACH_CONFIG_FILE` points
    /// at one, a TOML file. Environment values win over file values.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = match std::env::var_os("REACH_CONFIG_FILE") {
            Some(path) => Config::load_file(Path::new(&path))?,
            None => Config::development(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML file.
    pub fn save_file(&self, path: &Path) -> ConfigResult<()> {
        let raw = toml::to_string_pretty(self).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `REACH_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        apply_env_parse("REACH_CHANNEL_TIMEOUT_MS", &mut self.broker.channel_timeout_ms)?;
        apply_env_parse("REACH_TREE_ID_CAPACITY", &mut self.broker.tree_id_capacity)?;
        apply_env_parse("REACH_INITIAL_ACCOUNT", &mut self.broker.initial_account)?;
        if let Ok(dir) = std::env::var("REACH_SETTINGS_DIR") {
            self.broker.settings_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("REACH_LOG_LEVEL") {
            self.logging.level = level;
        }
        apply_env_parse("REACH_LOG_JSON", &mut self.logging.json_format)?;
        Ok(())
    }

    /// Reject configurations the broker cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.channel_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "broker.channel_timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.broker.tree_id_capacity < 1 {
            return Err(ConfigError::InvalidValue {
                key: "broker.tree_id_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The Channel bound as a [`Duration`].
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.channel_timeout_ms)
    }
}

fn apply_env_parse<T>(name: &str, slot: &mut T) -> ConfigResult<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        *slot = raw.parse().map_err(|err| ConfigError::InvalidValue {
            key: name.to_string(),
            message: format!("{err}"),
        })?;
    }
    Ok(())
}

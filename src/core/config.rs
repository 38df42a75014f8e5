//! TOML configuration file parsing and loading
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration. Keys are kebab-case and grouped per component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error_handling::ContextualError;
use super::logging::LogFormat;

pub const CONFIG_DIR_NAME: &str = "Courier";
pub const CONFIG_FILE_NAME: &str = "courier.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, ConfigError::Parse { .. } | ConfigError::Invalid { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::Parse { message, .. } | ConfigError::Invalid { message } => Some(message),
            ConfigError::Io { .. } => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Ring sizing and worker fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct QueueConfig {
    /// Starting ring size; 0 keeps the ring fixed at `capacity`.
    pub initial_size: usize,
    pub capacity: usize,
    /// Queued messages per additional woken worker.
    pub multiworker_offset: usize,
    pub thread_max: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_size: 16,
            capacity: 1024,
            multiworker_offset: 1,
            thread_max: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct InboxConfig {
    pub send_timeout_ms: u64,
    pub init_timeout_ms: u64,
    pub shutdown_wait_ms: u64,
}

impl InboxConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 60_000,
            init_timeout_ms: 10_000,
            shutdown_wait_ms: 1_000,
        }
    }
}

/// Reporting and escalation for offers rejected by a full queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct QueueFullConfig {
    pub log_every: u64,
    pub burst_window_secs: u64,
    pub fatal_after_secs: u64,
    pub exit_code: i32,
}

impl QueueFullConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_secs)
    }

    pub fn fatal_after(&self) -> Duration {
        Duration::from_secs(self.fatal_after_secs)
    }
}

impl Default for QueueFullConfig {
    fn default() -> Self {
        Self {
            log_every: 100,
            burst_window_secs: 60,
            fatal_after_secs: 180,
            // EX_UNAVAILABLE
            exit_code: 69,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            color: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CourierConfig {
    pub queue: QueueConfig,
    pub inbox: InboxConfig,
    pub queue_full: QueueFullConfig,
    pub logging: LoggingConfig,
}

impl CourierConfig {
    /// Default location: `<config dir>/Courier/courier.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads `path` if given (it must exist), else the default file if present,
    /// else the defaults.
    pub fn discover(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::parse(&contents).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        log::debug!("configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> ConfigResult<Self> {
        let config: CourierConfig = toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: PathBuf::new(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let queue = &self.queue;
        if queue.capacity < 2 || !queue.capacity.is_power_of_two() {
            return Err(invalid(format!(
                "queue.capacity must be a power of two of at least 2, got {}",
                queue.capacity
            )));
        }
        if queue.initial_size != 0 && !queue.initial_size.is_power_of_two() {
            return Err(invalid(format!(
                "queue.initial-size must be 0 or a power of two, got {}",
                queue.initial_size
            )));
        }
        if queue.initial_size > queue.capacity {
            return Err(invalid(format!(
                "queue.initial-size {} exceeds queue.capacity {}",
                queue.initial_size, queue.capacity
            )));
        }
        if queue.multiworker_offset == 0 {
            return Err(invalid("queue.multiworker-offset must be at least 1"));
        }
        if queue.thread_max == 0 {
            return Err(invalid("queue.thread-max must be at least 1"));
        }
        if self.queue_full.log_every == 0 {
            return Err(invalid("queue-full.log-every must be at least 1"));
        }
        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(invalid(format!(
                "logging.level '{}' is not one of off, error, warn, info, debug, trace",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|err| invalid(err.to_string()))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

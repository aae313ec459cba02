//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub logging: LogSettings,

    /// Connection used by generators that do not name one.
    #[serde(default)]
    pub default_connection_id: Option<String>,
}

/// Per-connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Per-request deadlines, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_query_ms")]
    pub query_ms: u64,

    #[serde(default = "default_introspection_ms")]
    pub introspection_ms: u64,

    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// text or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_max_connections() -> u32 {
    5
}
fn default_acquire_timeout() -> u64 {
    3
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_query_ms() -> u64 {
    30_000
}
fn default_introspection_ms() -> u64 {
    15_000
}
fn default_connect_ms() -> u64 {
    5_000
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            query_ms: default_query_ms(),
            introspection_ms: default_introspection_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl TimeoutSettings {
    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_ms)
    }

    pub fn introspection(&self) -> Duration {
        Duration::from_millis(self.introspection_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl CoreConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CoreConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(CoreError::Config(
                "pool.max_connections must be at least 1".into(),
            ));
        }
        if self.pool.acquire_timeout_secs == 0 {
            return Err(CoreError::Config(
                "pool.acquire_timeout_secs must be at least 1".into(),
            ));
        }
        if self.timeouts.query_ms == 0
            || self.timeouts.introspection_ms == 0
            || self.timeouts.connect_ms == 0
        {
            return Err(CoreError::Config("timeouts must be non-zero".into()));
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(CoreError::Config(format!(
                    "logging.format must be 'text' or 'json', got '{}'",
                    other
                )))
            }
        }
        Ok(())
    }
}

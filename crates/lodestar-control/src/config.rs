//! Configuration for lodestar-control.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the authorization and dispatch core.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Execution backend client configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Log index client configuration.
    #[serde(default)]
    pub logs: LogIndexConfig,

    /// Event fan-out configuration.
    #[serde(default)]
    pub events: EventConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `LODESTAR_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("LODESTAR_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LODESTAR_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/lodestar".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Execution backend client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL for the execution backend HTTP API.
    #[serde(default = "default_executor_url")]
    pub url: String,

    /// Request timeout in seconds. The backend call blocks the trigger flow
    /// until it resolves, so this is the only bound on it.
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_executor_url() -> String {
    "http://localhost:8084".to_owned()
}

const fn default_executor_timeout_secs() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: default_executor_url(),
            timeout_secs: default_executor_timeout_secs(),
        }
    }
}

/// Log index client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogIndexConfig {
    /// Base URL for the log index HTTP API.
    #[serde(default = "default_logs_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_logs_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_logs_url() -> String {
    "http://localhost:9200".to_owned()
}

const fn default_logs_timeout_secs() -> u64 {
    10
}

impl Default for LogIndexConfig {
    fn default() -> Self {
        Self {
            url: default_logs_url(),
            timeout_secs: default_logs_timeout_secs(),
        }
    }
}

/// Event fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    /// Broadcast channel capacity; slow subscribers past this lag skip
    /// ahead.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

const fn default_event_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.executor.url, "http://localhost:8084");
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [database]
            url = "postgres://user:pass@db:5432/mydb"
            max_connections = 20

            [executor]
            url = "http://executor:9000"
            timeout_secs = 60

            [events]
            capacity = 1024
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/mydb");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.executor.url, "http://executor:9000");
        assert_eq!(config.executor.timeout_secs, 60);
        assert_eq!(config.events.capacity, 1024);
    }
}

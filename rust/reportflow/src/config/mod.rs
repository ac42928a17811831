//! Configuration management for the report daemon.
//!
//! Configuration is layered:
//! 1. Default values
//! 2. Config file (`config/reportflow.{toml,yaml,json}` or an explicit path)
//! 3. Environment variables prefixed with `REPORTFLOW__` (`__` separates sections)
//!
//! ```rust,ignore
//! use reportflow::config::{AppConfig, ConfigValidator};
//!
//! let config = AppConfig::load(None)?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigIssue, ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Execution engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Schedule manager settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Subscription delivery settings.
    #[serde(default)]
    pub delivery: DeliverySettings,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment,
    /// then validate it.
    ///
    /// Use [`Self::load_unchecked`] to skip validation.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(path)?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(path: Option<&str>) -> anyhow::Result<Self> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.path", default_database_path())?
            .set_default("logging.level", default_log_level())?;

        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path).required(true)),
            None => builder.add_source(config::File::with_name("config/reportflow").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("REPORTFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `SQLite` database file, or `:memory:` for a process-local store.
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "./data/reportflow.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// TTL applied to cached results when the caller does not pass one.
    #[serde(default = "default_cache_ttl")]
    pub default_cache_ttl_secs: u64,
    /// Terminal executions kept in memory before the oldest are dropped.
    #[serde(default = "default_max_retained_executions")]
    pub max_retained_executions: usize,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_max_retained_executions() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl_secs: default_cache_ttl(),
            max_retained_executions: default_max_retained_executions(),
        }
    }
}

/// Schedule manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the background sweep runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Subscription delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Whether the subscription sweep and drain trigger run.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between subscription sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Milliseconds between drain triggers for the delivery queue.
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
    /// Directory used by the filesystem channel when a subscription does not
    /// name one.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_drain_interval() -> u64 {
    1000
}

fn default_output_dir() -> String {
    "./data/deliveries".to_string()
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            drain_interval_ms: default_drain_interval(),
            output_dir: default_output_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level / `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.engine.default_cache_ttl_secs, 3600);
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.delivery.drain_interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("REPORTFLOW__SCHEDULER__SWEEP_INTERVAL_SECS", "15");
        std::env::set_var("REPORTFLOW__ENGINE__DEFAULT_CACHE_TTL_SECS", "120");

        let config = AppConfig::load_unchecked(None).unwrap();

        std::env::remove_var("REPORTFLOW__SCHEDULER__SWEEP_INTERVAL_SECS");
        std::env::remove_var("REPORTFLOW__ENGINE__DEFAULT_CACHE_TTL_SECS");

        assert_eq!(config.scheduler.sweep_interval_secs, 15);
        assert_eq!(config.engine.default_cache_ttl_secs, 120);
    }

    #[test]
    #[serial]
    fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reportflow.toml");
        std::fs::write(
            &path,
            "[database]\npath = \"/tmp/custom.db\"\n\n[delivery]\ndrain_interval_ms = 250\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.database.path, "/tmp/custom.db");
        assert_eq!(config.delivery.drain_interval_ms, 250);
        assert_eq!(config.delivery.sweep_interval_secs, 60);
    }
}

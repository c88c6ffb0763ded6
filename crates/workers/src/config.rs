//! Worker configuration, loaded from TOML.
//!
//! Every section is optional. A family section may override any of its tasks
//! by name; tasks it does not mention keep their built-in cadence.
//!
//! ```toml
//! [host]
//! shutdown_timeout_secs = 30
//!
//! [marketing]
//! enabled = true
//!
//! [[marketing.tasks]]
//! name = "marketing.automation_steps"
//! interval_secs = 120
//! concurrency = 8
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use shopworks_infra::DatabaseSettings;
use shopworks_observability::LogSettings;
use shopworks_scheduler::LoopSettings;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SHOPWORKS_CONFIG";
/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "SHOPWORKS_DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration of the worker process.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub logging: LogSettings,
    pub host: HostSettings,
    pub database: Option<DatabaseSettings>,
    pub analytics: FamilySettings,
    pub inventory: FamilySettings,
    pub marketing: FamilySettings,
    pub affinity: AffinitySettings,
    pub review_email: FamilySettings,
    pub review_import: FamilySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Upper bound on draining in-flight work at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

impl HostSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// One task family: an on/off switch plus its loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FamilySettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub schedule: LoopSettings,
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: LoopSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AffinitySettings {
    #[serde(flatten)]
    pub family: FamilySettings,
    /// Lookback used for shops without their own setting.
    pub default_lookback_days: u32,
}

impl Default for AffinitySettings {
    fn default() -> Self {
        Self {
            family: FamilySettings::default(),
            default_lookback_days: 90,
        }
    }
}

impl WorkersConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `$SHOPWORKS_CONFIG` when set, else defaults; then apply
    /// `$SHOPWORKS_DATABASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(PathBuf::from(path))?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            match config.database.as_mut() {
                Some(db) => db.url = url,
                None => config.database = Some(DatabaseSettings::new(url)),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopworks_observability::LogFormat;

    #[test]
    fn empty_document_uses_defaults() {
        let config = WorkersConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkersConfig::default());
        assert_eq!(config.host.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.affinity.default_lookback_days, 90);
        assert!(config.analytics.enabled);
        assert!(config.database.is_none());
    }

    #[test]
    fn family_sections_override_tasks_by_name() {
        let config = WorkersConfig::from_toml_str(
            r#"
            [logging]
            format = "pretty"
            level = "debug"

            [marketing]
            tick_secs = 30

            [[marketing.tasks]]
            name = "marketing.automation_steps"
            interval_secs = 120
            concurrency = 8

            [affinity]
            enabled = false
            default_lookback_days = 30

            [database]
            url = "postgres://localhost/shopworks"
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.marketing.schedule.tick(), Some(Duration::from_secs(30)));
        let steps = config.marketing.schedule.task("marketing.automation_steps").unwrap();
        assert_eq!(steps.interval(), Duration::from_secs(120));
        assert_eq!(steps.concurrency, 8);
        assert!(!config.affinity.family.enabled);
        assert_eq!(config.affinity.default_lookback_days, 30);
        assert_eq!(config.database.unwrap().max_connections, 5);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = WorkersConfig::load("/nonexistent/shopworks.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shopworks.toml"));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = WorkersConfig::from_toml_str("[host]\nshutdown_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn example_config_parses() {
        let config =
            WorkersConfig::from_toml_str(include_str!("../../../config/workers.example.toml")).unwrap();
        assert!(config.review_import.schedule.task("reviews.import").is_some());
    }
}

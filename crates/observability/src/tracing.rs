//! Tracing/logging initialization.
//!
//! `RUST_LOG` always wins over the configured default level.

use anyhow::Context;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line (production).
    #[default]
    Json,
    /// Human-readable multi-line output (local development).
    Pretty,
}

/// Logging settings, usually read from the `[logging]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `shopworks_scheduler=debug`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Initialize tracing/logging from explicit settings.
///
/// Like [`init`], a second call is a no-op.
pub fn init_with(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("invalid log level directive: {}", settings.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_json_info() {
        let settings: LogSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, LogSettings::default());
        assert_eq!(settings.format, LogFormat::Json);
    }

    #[test]
    fn settings_parse_pretty() {
        let settings: LogSettings =
            serde_json::from_str(r#"{ "format": "pretty", "level": "debug" }"#).unwrap();
        assert_eq!(settings.format, LogFormat::Pretty);
        assert_eq!(settings.level, "debug");
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        init();
        init();
        assert!(init_with(&LogSettings::default()).is_ok());
    }
}

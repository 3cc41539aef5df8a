pub mod loader;

pub use loader::{SettingsLoader, ENV_JIT, ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_STATS};

use crate::error::SettingsError;
use crate::logging::{LogFormat, LoggingConfig, LoggingEnvironment};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;

/// Settings shared by every scope of one tree.
///
/// Every field has a default, so an empty settings file is valid:
///
/// ```toml
/// [logging]
/// level = "debug"
/// format = "pretty"
///
/// [stats]
/// enabled = false
///
/// [linking]
/// just_in_time = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub logging: LoggingSettings,
    pub stats: StatsSettings,
    pub linking: LinkingSettings,
}

impl ResolverSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: ResolverSettings = toml::from_str(content)?;
        settings.logging.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    pub format: LogFormat,
    pub show_target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            show_target: false,
        }
    }
}

impl LoggingSettings {
    fn parsed_level(&self) -> Result<Level, SettingsError> {
        Level::from_str(&self.level).map_err(|_| SettingsError::InvalidValue {
            name: "logging.level".to_string(),
            value: self.level.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.parsed_level().map(|_| ())
    }

    /// Logging configuration for [`init_logging`](crate::logging::init_logging).
    pub fn to_logging_config(&self) -> Result<LoggingConfig, SettingsError> {
        Ok(LoggingConfig {
            environment: LoggingEnvironment::Development,
            level: self.parsed_level()?,
            format: self.format,
            show_target: self.show_target,
            show_thread_ids: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    pub enabled: bool,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingSettings {
    /// When false, unregistered keys are never synthesized.
    pub just_in_time: bool,
}

impl Default for LinkingSettings {
    fn default() -> Self {
        Self { just_in_time: true }
    }
}

use std::{collections::HashMap, env, fs, path::PathBuf};

use tracing::debug;

use super::ResolverSettings;
use crate::error::SettingsError;
use crate::logging::LogFormat;

pub const ENV_LOG_LEVEL: &str = "BINDGRAPH_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "BINDGRAPH_LOG_FORMAT";
pub const ENV_STATS: &str = "BINDGRAPH_STATS";
pub const ENV_JIT: &str = "BINDGRAPH_JIT";

const ENV_PREFIX: &str = "BINDGRAPH_";

/// Loads settings from an optional TOML file, then applies environment overrides
pub struct SettingsLoader {
    path: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl SettingsLoader {
    /// Loader without a file; only the process environment applies
    pub fn new() -> Self {
        Self {
            path: None,
            env: None,
        }
    }

    /// Loader reading `path` if it exists
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            env: None,
        }
    }

    /// Use `env` instead of the process environment (for testing)
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ResolverSettings, SettingsError> {
        let mut settings = match &self.path {
            Some(path) => self.load_file(path)?,
            None => ResolverSettings::default(),
        };

        let env_map = self.collect_env_vars();
        apply_env(&mut settings, &env_map)?;
        settings.logging.validate()?;
        Ok(settings)
    }

    fn load_file(&self, path: &PathBuf) -> Result<ResolverSettings, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(ResolverSettings::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::FileRead(path.display().to_string(), e))?;
        ResolverSettings::from_toml_str(&content)
    }

    fn collect_env_vars(&self) -> HashMap<String, String> {
        match &self.env {
            Some(env_map) => env_map.clone(),
            None => env::vars().filter(|(name, _)| name.starts_with(ENV_PREFIX)).collect(),
        }
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env(
    settings: &mut ResolverSettings,
    env_map: &HashMap<String, String>,
) -> Result<(), SettingsError> {
    if let Some(level) = env_map.get(ENV_LOG_LEVEL) {
        settings.logging.level = level.to_ascii_lowercase();
    }
    if let Some(format) = env_map.get(ENV_LOG_FORMAT) {
        settings.logging.format =
            format
                .parse::<LogFormat>()
                .map_err(|value| SettingsError::InvalidValue {
                    name: ENV_LOG_FORMAT.to_string(),
                    value,
                })?;
    }
    if let Some(value) = env_map.get(ENV_STATS) {
        settings.stats.enabled = parse_flag(ENV_STATS, value)?;
    }
    if let Some(value) = env_map.get(ENV_JIT) {
        settings.linking.just_in_time = parse_flag(ENV_JIT, value)?;
    }
    Ok(())
}

fn parse_flag(name: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

use std::path::{Path, PathBuf};

use crate::config::settings::EngineSettings;
use crate::error::ConfigError;

pub const ENV_CONFIG_DIR: &str = "ACLSYNC_CONFIG_DIR";
pub const ENV_POLL_INTERVAL_SECS: &str = "ACLSYNC_POLL_INTERVAL_SECS";
pub const ENV_DATABASE_PATH: &str = "ACLSYNC_DATABASE_PATH";
pub const ENV_LOG: &str = "ACLSYNC_LOG";

/// Reads settings from a YAML file and applies environment overrides.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<EngineSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings = load_settings_from_str(&content)?;
    let settings = apply_env_overrides(settings)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn load_settings_from_str(content: &str) -> Result<EngineSettings, ConfigError> {
    let settings: EngineSettings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Overrides settings from `ACLSYNC_*` environment variables.
pub fn apply_env_overrides(settings: EngineSettings) -> Result<EngineSettings, ConfigError> {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

fn apply_overrides(
    mut settings: EngineSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineSettings, ConfigError> {
    if let Some(dir) = lookup(ENV_CONFIG_DIR) {
        settings.config_dir = PathBuf::from(dir);
    }
    if let Some(value) = lookup(ENV_POLL_INTERVAL_SECS) {
        settings.poll_interval_secs =
            value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                variable: ENV_POLL_INTERVAL_SECS,
                value: value.clone(),
            })?;
    }
    if let Some(path) = lookup(ENV_DATABASE_PATH) {
        settings.database_path = Some(PathBuf::from(path));
    }
    if let Some(filter) = lookup(ENV_LOG) {
        settings.logging.filter = filter;
    }
    Ok(settings)
}

pub fn validate_settings(settings: &EngineSettings) -> Result<(), ConfigError> {
    if settings.config_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "configDir must not be empty".to_string(),
        });
    }
    if settings.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "pollIntervalSecs must be at least 1".to_string(),
        });
    }
    if settings.call_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "callTimeoutSecs must be at least 1".to_string(),
        });
    }
    if settings.logging.filter.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "logging.filter must not be empty".to_string(),
        });
    }
    Ok(())
}

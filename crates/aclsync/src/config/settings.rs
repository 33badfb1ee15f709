use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine settings, usually read from `aclsync.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Directory holding the declaration files.
    pub config_dir: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Health database location. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Deadline for each collaborator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl EngineSettings {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            poll_interval_secs: default_poll_interval_secs(),
            database_path: None,
            call_timeout_secs: default_call_timeout_secs(),
            logging: LoggingSettings::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Configured database path, or the default under the data directory.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

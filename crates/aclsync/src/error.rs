use std::path::PathBuf;
use thiserror::Error;

use crate::declarative::health::HealthError;
use crate::declarative::resource::ResourceKind;
use crate::declarative::DeclarativeError;

#[derive(Error, Debug)]
pub enum AclsyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Declarative config error: {0}")]
    Declarative(#[from] DeclarativeError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Health tracking error: {0}")]
    Health(#[from] HealthError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("No collaborator wired for {0}")]
    MissingCollaborator(ResourceKind),

    #[error("Engine is already running")]
    AlreadyRunning,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for {variable}")]
    InvalidEnv { variable: &'static str, value: String },

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, AclsyncError>;

//! Declarative engine error types.

use std::path::PathBuf;
use thiserror::Error;

use super::resource::ResourceKind;

/// Errors raised while watching, reading and parsing declarations.
#[derive(Error, Debug)]
pub enum DeclarativeError {
    #[error("Failed to read config directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{file}': {message}")]
    ParseYaml { file: String, message: String },

    #[error("Document {position} in '{file}' is neither a mapping nor a sequence")]
    MalformedDocument { file: String, position: usize },

    #[error("Declaration is not a mapping")]
    NotAMapping,

    #[error("Declaration is missing its kind tag")]
    MissingKind,

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("{0} objects cannot be declared directly")]
    UndeclarableKind(ResourceKind),

    #[error("Invalid {kind} declaration: {message}")]
    InvalidDeclaration { kind: ResourceKind, message: String },

    #[error("{kind} declaration has an empty '{field}'")]
    MissingIdentity { kind: ResourceKind, field: String },

    #[error("{kind} '{id}' is declared more than once (in '{first}' and '{second}')")]
    DuplicateResource {
        kind: ResourceKind,
        id: String,
        first: String,
        second: String,
    },

    #[error("{kind} '{id}' is already declared earlier in this file")]
    DeclaredTwiceInFile { kind: ResourceKind, id: String },

    #[error("Watcher is not running")]
    WatcherStopped,
}

/// Result type for declarative operations.
pub type Result<T> = std::result::Result<T, DeclarativeError>;

impl DeclarativeError {
    /// Errors that leave the directory listing untrustworthy for this poll.
    pub fn is_unstable_read(&self) -> bool {
        matches!(
            self,
            DeclarativeError::ReadDirectory { .. } | DeclarativeError::ReadFile { .. }
        )
    }
}

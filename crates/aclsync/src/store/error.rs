//! Errors returned by collaborator stores.

use thiserror::Error;

use crate::declarative::resource::ResourceKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{kind} '{id}' is referenced by another object: {referrer}")]
    ReferencedByAnotherObject {
        kind: ResourceKind,
        id: String,
        referrer: String,
    },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: ResourceKind, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    /// Whether removal was blocked by a reference from another object.
    pub fn is_referenced(&self) -> bool {
        matches!(self, StoreError::ReferencedByAnotherObject { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Errors expected to heal on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::DeadlineExceeded
        )
    }
}

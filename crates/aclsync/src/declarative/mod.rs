//! Declarative configuration engine.
//!
//! A mounted directory of YAML declarations is polled, parsed into typed
//! resources and reconciled into the collaborator stores.

pub mod error;
pub mod health;
pub mod ids;
pub mod manager;
pub mod parser;
pub mod registry;
pub mod resource;
pub mod updater;
pub mod watcher;

pub use error::DeclarativeError;
pub use health::{HealthRecord, HealthResourceKind, HealthStatus, HealthTracker, SqliteHealthTracker};
pub use manager::{ManagerState, PassFailure, PassReport, ReconciliationManager};
pub use parser::{DeclarationParser, ParsedBatch, ResourceParseError};
pub use registry::PROCESSING_ORDER;
pub use resource::{DeclaredResource, ResourceKind};
pub use updater::{DeletionOutcome, ResourceUpdater, UpdateError, UpdaterSet};
pub use watcher::{ChangeDetector, DirectoryWatcher, FileBatch, FileHashRecord, WatchHandler, WatchLoop};

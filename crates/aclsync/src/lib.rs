pub mod config;
pub mod db;
pub mod declarative;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

pub use config::{load_settings, load_settings_from_str, EngineSettings, LoggingSettings};
pub use declarative::{
    DeclarativeError, HealthRecord, HealthStatus, HealthTracker, ManagerState, PassReport,
    ReconciliationManager, ResourceKind, SqliteHealthTracker,
};
pub use engine::{Engine, EngineBuilder};
pub use error::{AclsyncError, ConfigError, Result};
pub use model::{DeclaredObject, Identify, Identity, MutabilityMode, Origin, Traits};
pub use store::{AccessContext, MemoryStore, StoreError};

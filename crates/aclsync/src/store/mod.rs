//! Collaborator interfaces the engine writes through.
//!
//! The persistent stores, the live provider registry and the notification
//! runtime live outside this crate. They are reached only through the
//! traits below; [`memory::MemoryStore`] implements all of them in memory.

pub mod context;
pub mod error;
pub mod memory;

use async_trait::async_trait;

use crate::model::{
    AccessScope, AuthMachineToMachineConfig, AuthProvider, Group, Notifier, PermissionSet, Role,
};

pub use context::{AccessContext, AccessMode, Authority};
pub use error::StoreError;
pub use memory::MemoryStore;

/// Result type for collaborator calls.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter passed to [`ObjectStore::get_filtered`].
pub type Filter<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// CRUD surface of a store holding one object kind.
///
/// Stores enforce origin ownership, forced mutability and referential
/// integrity. Errors are returned as-is to the engine.
#[async_trait]
pub trait ObjectStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn get(&self, ctx: &AccessContext, id: &str) -> Result<Option<T>>;

    async fn get_filtered(&self, ctx: &AccessContext, filter: Filter<'_, T>) -> Result<Vec<T>>;

    /// Creates the object, failing with `AlreadyExists` if the key is taken.
    async fn add(&self, ctx: &AccessContext, object: &T) -> Result<()>;

    /// Replaces the object, failing with `NotFound` if it does not exist.
    async fn update(&self, ctx: &AccessContext, object: &T) -> Result<()>;

    async fn upsert(&self, ctx: &AccessContext, object: &T) -> Result<()>;

    async fn remove(&self, ctx: &AccessContext, id: &str) -> Result<()>;
}

pub type RoleStore = dyn ObjectStore<Role>;
pub type PermissionSetStore = dyn ObjectStore<PermissionSet>;
pub type AccessScopeStore = dyn ObjectStore<AccessScope>;
pub type AuthProviderStore = dyn ObjectStore<AuthProvider>;
pub type NotifierStore = dyn ObjectStore<Notifier>;
pub type M2mConfigStore = dyn ObjectStore<AuthMachineToMachineConfig>;

#[async_trait]
pub trait GroupStore: ObjectStore<Group> {
    /// Removes every group attached to an auth provider, regardless of origin.
    ///
    /// Requires a forced context. Returns the number of removed groups.
    async fn remove_all_for_provider(&self, ctx: &AccessContext, provider_id: &str)
        -> Result<usize>;
}

/// Registry of live (in-process) auth providers.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn register(&self, ctx: &AccessContext, provider: &AuthProvider) -> Result<()>;

    /// Unregistering an unknown provider is not an error.
    async fn unregister(&self, ctx: &AccessContext, provider_id: &str) -> Result<()>;
}

/// Runtime that dispatches notifications through live notifiers.
pub trait NotificationProcessor: Send + Sync {
    fn update_notifier(&self, notifier: &Notifier);

    fn remove_notifier(&self, notifier_id: &str);
}

/// Removes references from policies to a notifier about to be deleted.
#[async_trait]
pub trait PolicyCleaner: Send + Sync {
    async fn detach_notifier(&self, ctx: &AccessContext, notifier_id: &str) -> Result<()>;
}

/// Health registration of notifier integrations.
pub trait IntegrationHealthReporter: Send + Sync {
    fn remove_integration_health(&self, integration_id: &str) -> Result<()>;
}

/// Hook run before a declarative role is removed.
#[async_trait]
pub trait RoleCleaner: Send + Sync {
    async fn cleanup_role(&self, ctx: &AccessContext, role: &Role) -> Result<()>;
}

/// Role cleaner that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRoleCleaner;

#[async_trait]
impl RoleCleaner for NoopRoleCleaner {
    async fn cleanup_role(&self, _ctx: &AccessContext, _role: &Role) -> Result<()> {
        Ok(())
    }
}

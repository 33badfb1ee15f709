//! Per-kind resource updaters.
//!
//! An updater knows how to write one kind of declared object into its
//! collaborator store and how to sweep away declarative objects of that kind
//! that are no longer declared. Removal blocked by a reference orphans the
//! object instead.

pub mod access_scope;
pub mod auth_provider;
pub mod group;
pub mod m2m;
pub mod notifier;
pub mod permission_set;
pub mod role;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::resource::ResourceKind;
use crate::model::{DeclaredObject, Identify, Origin};
use crate::store::{AccessContext, ObjectStore, StoreError};

pub use access_scope::AccessScopeUpdater;
pub use auth_provider::AuthProviderUpdater;
pub use group::GroupUpdater;
pub use m2m::M2mConfigUpdater;
pub use notifier::NotifierUpdater;
pub use permission_set::PermissionSetUpdater;
pub use role::RoleUpdater;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{kind} '{id}' references missing {dependency} '{name}'")]
    MissingDependency {
        kind: ResourceKind,
        id: String,
        dependency: ResourceKind,
        name: String,
    },

    #[error("{removal}; marking it orphaned failed: {source}")]
    OrphanFailed {
        removal: Box<UpdateError>,
        #[source]
        source: StoreError,
    },

    #[error("{} {kind} deletion(s) failed: {}", .errors.len(), .errors.join("; "))]
    Aggregate {
        kind: ResourceKind,
        errors: Vec<String>,
    },
}

impl UpdateError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, UpdateError::InvariantViolation(_))
    }

    pub fn is_referenced(&self) -> bool {
        matches!(self, UpdateError::Store(e) if e.is_referenced())
    }
}

/// Reports a broken engine invariant.
///
/// Panics in debug builds. In release builds the error is returned so the
/// caller can halt the pass.
pub fn invariant_violation(message: impl Into<String>) -> UpdateError {
    let message = message.into();
    if cfg!(debug_assertions) {
        panic!("invariant violation: {message}");
    }
    log::error!("Invariant violation: {}", message);
    UpdateError::InvariantViolation(message)
}

pub(crate) fn kind_mismatch(expected: ResourceKind, object: &DeclaredObject) -> UpdateError {
    invariant_violation(format!(
        "{expected} updater received a {} object",
        object.kind()
    ))
}

/// Writes declared objects of one kind and sweeps undeclared ones.
#[async_trait]
pub trait ResourceUpdater: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Creates or updates the object. Store errors are returned unchanged.
    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError>;

    /// Removes declarative objects of this kind whose id is not in `ids_to_skip`.
    async fn delete_resources(
        &self,
        ctx: &AccessContext,
        ids_to_skip: &HashSet<String>,
    ) -> DeletionOutcome;
}

// ============================================================================
// Deletion outcome
// ============================================================================

/// Result of removing one candidate object.
#[derive(Debug)]
pub struct DeletionItem {
    pub id: String,
    pub name: String,
    pub health_id: String,
    /// Set when removal was blocked by a reference and the object was orphaned.
    pub orphaned: bool,
    pub error: Option<UpdateError>,
}

impl DeletionItem {
    pub fn is_removed(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-item results of a deletion sweep over one kind.
#[derive(Debug)]
pub struct DeletionOutcome {
    pub kind: ResourceKind,
    pub items: Vec<DeletionItem>,
    /// Set when candidates could not be listed at all.
    pub listing_error: Option<UpdateError>,
}

impl DeletionOutcome {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            listing_error: None,
        }
    }

    fn listing_failed(kind: ResourceKind, error: UpdateError) -> Self {
        Self {
            listing_error: Some(error),
            ..Self::new(kind)
        }
    }

    pub fn removed(&self) -> impl Iterator<Item = &DeletionItem> {
        self.items.iter().filter(|i| i.is_removed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeletionItem> {
        self.items.iter().filter(|i| !i.is_removed())
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed().map(|i| i.id.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none() && self.failed().next().is_none()
    }

    /// Collapses the outcome into failed ids plus one aggregated error.
    pub fn into_result(self) -> (Vec<String>, Option<UpdateError>) {
        let failed_ids = self.failed_ids();
        let mut errors: Vec<String> = self
            .listing_error
            .iter()
            .map(|e| format!("listing failed: {e}"))
            .collect();
        errors.extend(
            self.items
                .iter()
                .filter_map(|i| i.error.as_ref().map(|e| format!("{} '{}': {}", self.kind, i.name, e))),
        );
        let error = (!errors.is_empty()).then_some(UpdateError::Aggregate {
            kind: self.kind,
            errors,
        });
        (failed_ids, error)
    }
}

// ============================================================================
// Shared sweep
// ============================================================================

/// Kind-specific steps of a deletion sweep.
#[async_trait]
pub(crate) trait Sweep: Send + Sync {
    type Object: Identify + Clone + Send + Sync + 'static;

    /// Declarative and orphaned objects of this kind.
    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<Self::Object>, StoreError>;

    /// Runs before removal. A failure skips the removal.
    async fn cleanup(&self, _ctx: &AccessContext, _object: &Self::Object) -> Result<(), UpdateError> {
        Ok(())
    }

    async fn remove(&self, ctx: &AccessContext, object: &Self::Object) -> Result<(), UpdateError>;

    /// Writes back an object whose origin was flipped to orphaned.
    async fn orphan(&self, ctx: &AccessContext, object: &Self::Object) -> Result<(), StoreError>;
}

pub(crate) async fn sweep<S: Sweep>(
    sweeper: &S,
    ctx: &AccessContext,
    ids_to_skip: &HashSet<String>,
) -> DeletionOutcome {
    let kind = <S::Object as Identify>::KIND;
    let candidates = match sweeper.list_declarative(ctx).await {
        Ok(objects) => objects,
        Err(e) => {
            log::warn!("Failed to list declarative {} objects: {}", kind, e);
            return DeletionOutcome::listing_failed(kind, e.into());
        }
    };

    let mut outcome = DeletionOutcome::new(kind);
    for object in candidates {
        let identity = object.identity();
        if ids_to_skip.contains(&identity.id) {
            continue;
        }
        let health_id = object.health_id();

        let removal = match sweeper.cleanup(ctx, &object).await {
            Ok(()) => sweeper.remove(ctx, &object).await,
            Err(e) => Err(e),
        };

        let (orphaned, error) = match removal {
            Ok(()) => {
                log::info!("Removed declarative {} '{}'", kind, identity.name);
                (false, None)
            }
            Err(e) if e.is_referenced() => {
                log::info!(
                    "{} '{}' is still referenced, marking it orphaned: {}",
                    kind,
                    identity.name,
                    e
                );
                let mut orphan = object;
                orphan.traits_mut().origin = Origin::DeclarativeOrphaned;
                match sweeper.orphan(ctx, &orphan).await {
                    Ok(()) => (true, Some(e)),
                    Err(orphan_err) => {
                        log::warn!(
                            "Failed to mark {} '{}' orphaned: {}",
                            kind,
                            identity.name,
                            orphan_err
                        );
                        let error = UpdateError::OrphanFailed {
                            removal: Box::new(e),
                            source: orphan_err,
                        };
                        (false, Some(error))
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to remove {} '{}': {}", kind, identity.name, e);
                (false, Some(e))
            }
        };

        outcome.items.push(DeletionItem {
            id: identity.id,
            name: identity.name,
            health_id,
            orphaned,
            error,
        });
    }
    outcome
}

// ============================================================================
// Store helpers
// ============================================================================

/// Lists objects owned by the declarative path, orphaned ones included.
pub(crate) async fn list_declarative<T, S>(store: &S, ctx: &AccessContext) -> Result<Vec<T>, StoreError>
where
    T: Identify + Send + Sync + 'static,
    S: ObjectStore<T> + ?Sized,
{
    store
        .get_filtered(ctx, &|o: &T| o.traits().origin.is_declarative())
        .await
}

/// Upserts `desired` unless the stored object is already identical.
///
/// Returns whether a write was issued.
pub(crate) async fn upsert_if_changed<T, S>(
    store: &S,
    ctx: &AccessContext,
    desired: &T,
) -> Result<bool, UpdateError>
where
    T: Identify + PartialEq + Send + Sync + 'static,
    S: ObjectStore<T> + ?Sized,
{
    let id = desired.identity().id;
    if store.get(ctx, &id).await?.as_ref() == Some(desired) {
        return Ok(false);
    }
    store.upsert(ctx, desired).await?;
    Ok(true)
}

// ============================================================================
// Updater set
// ============================================================================

/// Updaters keyed by the kind they handle.
#[derive(Clone, Default)]
pub struct UpdaterSet {
    updaters: BTreeMap<ResourceKind, Arc<dyn ResourceUpdater>>,
}

impl UpdaterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an updater, replacing any previous one for its kind.
    pub fn insert(&mut self, updater: Arc<dyn ResourceUpdater>) {
        self.updaters.insert(updater.kind(), updater);
    }

    pub fn with(mut self, updater: Arc<dyn ResourceUpdater>) -> Self {
        self.insert(updater);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceUpdater>> {
        self.updaters.get(&kind)
    }

    /// Kinds without a registered updater.
    pub fn missing_kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::all()
            .iter()
            .copied()
            .filter(|k| !self.updaters.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for UpdaterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterSet")
            .field("kinds", &self.updaters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Every updater wired to one [`crate::store::MemoryStore`].
pub fn memory_updaters(store: &Arc<crate::store::MemoryStore>) -> UpdaterSet {
    UpdaterSet::new()
        .with(Arc::new(AccessScopeUpdater::new(store.clone())))
        .with(Arc::new(PermissionSetUpdater::new(store.clone())))
        .with(Arc::new(RoleUpdater::new(
            store.clone(),
            Arc::new(crate::store::NoopRoleCleaner),
        )))
        .with(Arc::new(AuthProviderUpdater::new(
            store.clone(),
            store.clone(),
            store.clone(),
        )))
        .with(Arc::new(GroupUpdater::new(store.clone())))
        .with(Arc::new(NotifierUpdater::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        )))
        .with(Arc::new(M2mConfigUpdater::new(store.clone(), store.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Notifier, Traits};

    fn item(id: &str, error: Option<UpdateError>) -> DeletionItem {
        DeletionItem {
            id: id.to_string(),
            name: id.to_string(),
            health_id: id.to_string(),
            orphaned: false,
            error,
        }
    }

    #[test]
    fn test_clean_outcome() {
        let mut outcome = DeletionOutcome::new(ResourceKind::Role);
        outcome.items.push(item("a", None));
        assert!(outcome.is_clean());
        let (failed, error) = outcome.into_result();
        assert!(failed.is_empty());
        assert!(error.is_none());
    }

    #[test]
    fn test_outcome_aggregates_errors() {
        let mut outcome = DeletionOutcome::new(ResourceKind::Notifier);
        outcome.items.push(item("a", None));
        outcome.items.push(item(
            "b",
            Some(UpdateError::Store(StoreError::Unavailable("down".into()))),
        ));
        outcome.items.push(item(
            "c",
            Some(UpdateError::Store(StoreError::DeadlineExceeded)),
        ));
        assert_eq!(outcome.removed().count(), 1);
        let (failed, error) = outcome.into_result();
        assert_eq!(failed, vec!["b".to_string(), "c".to_string()]);
        match error {
            Some(UpdateError::Aggregate { kind, errors }) => {
                assert_eq!(kind, ResourceKind::Notifier);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_listing_error_is_reported() {
        let outcome = DeletionOutcome::listing_failed(
            ResourceKind::Group,
            UpdateError::Store(StoreError::Unavailable("down".into())),
        );
        assert!(!outcome.is_clean());
        let (failed, error) = outcome.into_result();
        assert!(failed.is_empty());
        assert!(error.is_some());
    }

    /// Sweeps one notifier whose removal is blocked by a reference.
    struct PinnedSweep {
        orphan_error: Option<StoreError>,
    }

    fn howler() -> Notifier {
        Notifier {
            id: "howler".to_string(),
            name: "Howler".to_string(),
            notifier_type: "slack".to_string(),
            ui_endpoint: String::new(),
            label_key: String::new(),
            label_default: String::new(),
            config: Default::default(),
            traits: Traits::declarative(),
        }
    }

    #[async_trait]
    impl Sweep for PinnedSweep {
        type Object = Notifier;

        async fn list_declarative(&self, _ctx: &AccessContext) -> Result<Vec<Notifier>, StoreError> {
            Ok(vec![howler()])
        }

        async fn remove(&self, _ctx: &AccessContext, object: &Notifier) -> Result<(), UpdateError> {
            Err(StoreError::ReferencedByAnotherObject {
                kind: ResourceKind::Notifier,
                id: object.id.clone(),
                referrer: "policy 'curfew'".to_string(),
            }
            .into())
        }

        async fn orphan(&self, _ctx: &AccessContext, object: &Notifier) -> Result<(), StoreError> {
            assert_eq!(object.traits.origin, Origin::DeclarativeOrphaned);
            match &self.orphan_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_referenced_object_is_orphaned() {
        let sweeper = PinnedSweep { orphan_error: None };
        let outcome = sweep(&sweeper, &AccessContext::declarative(), &HashSet::new()).await;
        assert_eq!(outcome.items.len(), 1);
        assert!(outcome.items[0].orphaned);
        assert!(outcome.items[0].error.as_ref().unwrap().is_referenced());
    }

    #[tokio::test]
    async fn test_failed_orphan_write_is_reported() {
        let sweeper = PinnedSweep {
            orphan_error: Some(StoreError::Unavailable("down".into())),
        };
        let outcome = sweep(&sweeper, &AccessContext::declarative(), &HashSet::new()).await;
        let item = &outcome.items[0];
        assert!(!item.orphaned);
        let message = item.error.as_ref().unwrap().to_string();
        assert!(message.contains("referenced"));
        assert!(message.contains("marking it orphaned failed"));
        assert!(message.contains("down"));
    }

    #[test]
    fn test_memory_updaters_cover_every_kind() {
        let store = Arc::new(crate::store::MemoryStore::new());
        assert!(memory_updaters(&store).missing_kinds().is_empty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invariant violation"))]
    fn test_invariant_violation() {
        let err = invariant_violation("role updater received a notifier");
        assert!(err.is_invariant_violation());
    }
}

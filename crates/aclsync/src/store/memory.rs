//! In-memory implementation of every collaborator interface.
//!
//! Enforces the same rules a persistent store would: origin ownership,
//! forced mutability, referential integrity on upsert and "referenced"
//! failures on removal. Identical upserts are no-ops and are not counted
//! as writes. A journal of table writes and registry calls is kept for
//! inspection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    AccessContext, Filter, GroupStore, IntegrationHealthReporter, NotificationProcessor,
    ObjectStore, PolicyCleaner, ProviderRegistry, Result, StoreError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{
    AccessScope, AuthMachineToMachineConfig, AuthProvider, Group, Identify, Notifier,
    PermissionSet, Role,
};

/// Operation recorded in the store journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Upsert,
    Remove,
    Register,
    Unregister,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub op: StoreOp,
    pub kind: ResourceKind,
    pub id: String,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    access_scopes: BTreeMap<String, AccessScope>,
    permission_sets: BTreeMap<String, PermissionSet>,
    roles: BTreeMap<String, Role>,
    auth_providers: BTreeMap<String, AuthProvider>,
    groups: BTreeMap<String, Group>,
    notifiers: BTreeMap<String, Notifier>,
    m2m_configs: BTreeMap<String, AuthMachineToMachineConfig>,

    registered_providers: BTreeSet<String>,
    runtime_notifiers: BTreeSet<String>,
    /// policy name -> notifier ids
    policy_notifiers: BTreeMap<String, BTreeSet<String>>,
    /// Notifier references that cannot be detached.
    pinned_notifiers: BTreeSet<String>,
    integration_health: BTreeSet<String>,

    failures: BTreeMap<(ResourceKind, String), StoreError>,
    unavailable: bool,
    writes: usize,
    journal: Vec<StoreEvent>,
}

impl MemoryState {
    fn record(&mut self, op: StoreOp, kind: ResourceKind, id: &str) {
        if matches!(op, StoreOp::Upsert | StoreOp::Remove) {
            self.writes += 1;
        }
        self.journal.push(StoreEvent {
            op,
            kind,
            id: id.to_string(),
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn check_injected(&self, kind: ResourceKind, id: &str) -> Result<()> {
        match self.failures.get(&(kind, id.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Object kinds held by [`MemoryStore`].
pub trait MemoryKind: Identify + Clone + PartialEq + Send + Sync + 'static {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self>;

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self>;

    /// Checks that the objects this one points at exist.
    fn check_references(&self, _state: &MemoryState) -> Result<()> {
        Ok(())
    }

    /// Describes an object that still points at `id`, if any.
    fn referrer(_state: &MemoryState, _id: &str) -> Option<String> {
        None
    }
}

fn missing(what: &str, id: &str) -> StoreError {
    StoreError::InvalidArgs(format!("referenced {what} '{id}' does not exist"))
}

impl MemoryKind for AccessScope {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.access_scopes
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.access_scopes
    }

    fn referrer(state: &MemoryState, id: &str) -> Option<String> {
        state
            .roles
            .values()
            .find(|r| r.access_scope_id == id)
            .map(|r| format!("Role '{}'", r.name))
    }
}

impl MemoryKind for PermissionSet {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.permission_sets
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.permission_sets
    }

    fn referrer(state: &MemoryState, id: &str) -> Option<String> {
        state
            .roles
            .values()
            .find(|r| r.permission_set_id == id)
            .map(|r| format!("Role '{}'", r.name))
    }
}

impl MemoryKind for Role {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.roles
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.roles
    }

    fn check_references(&self, state: &MemoryState) -> Result<()> {
        if !state.permission_sets.contains_key(&self.permission_set_id) {
            return Err(missing("permission set", &self.permission_set_id));
        }
        if !state.access_scopes.contains_key(&self.access_scope_id) {
            return Err(missing("access scope", &self.access_scope_id));
        }
        Ok(())
    }

    fn referrer(state: &MemoryState, id: &str) -> Option<String> {
        if let Some(group) = state.groups.values().find(|g| g.role_name == id) {
            return Some(format!("Group '{}'", group.id));
        }
        state
            .m2m_configs
            .values()
            .find(|c| c.mappings.iter().any(|m| m.role == id))
            .map(|c| format!("AuthMachineToMachineConfig '{}'", c.issuer))
    }
}

impl MemoryKind for AuthProvider {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.auth_providers
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.auth_providers
    }

    fn referrer(state: &MemoryState, id: &str) -> Option<String> {
        state
            .groups
            .values()
            .find(|g| g.auth_provider_id == id)
            .map(|g| format!("Group '{}'", g.id))
    }
}

impl MemoryKind for Group {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.groups
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.groups
    }

    fn check_references(&self, state: &MemoryState) -> Result<()> {
        if !state.auth_providers.contains_key(&self.auth_provider_id) {
            return Err(missing("auth provider", &self.auth_provider_id));
        }
        if !state.roles.contains_key(&self.role_name) {
            return Err(missing("role", &self.role_name));
        }
        Ok(())
    }
}

impl MemoryKind for Notifier {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.notifiers
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.notifiers
    }

    fn referrer(state: &MemoryState, id: &str) -> Option<String> {
        if let Some((policy, _)) = state
            .policy_notifiers
            .iter()
            .find(|(_, notifiers)| notifiers.contains(id))
        {
            return Some(format!("policy '{policy}'"));
        }
        state
            .pinned_notifiers
            .contains(id)
            .then(|| "report configuration".to_string())
    }
}

impl MemoryKind for AuthMachineToMachineConfig {
    fn table(state: &MemoryState) -> &BTreeMap<String, Self> {
        &state.m2m_configs
    }

    fn table_mut(state: &mut MemoryState) -> &mut BTreeMap<String, Self> {
        &mut state.m2m_configs
    }

    fn check_references(&self, state: &MemoryState) -> Result<()> {
        match self
            .mappings
            .iter()
            .find(|m| !state.roles.contains_key(&m.role))
        {
            Some(mapping) => Err(missing("role", &mapping.role)),
            None => Ok(()),
        }
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn read<T: MemoryKind>(&self, ctx: &AccessContext, id: &str) -> Result<Option<T>> {
        ctx.check_deadline()?;
        let state = self.lock()?;
        state.check_available()?;
        Ok(T::table(&state).get(id).cloned())
    }

    fn read_filtered<T: MemoryKind>(
        &self,
        ctx: &AccessContext,
        filter: Filter<'_, T>,
    ) -> Result<Vec<T>> {
        ctx.check_deadline()?;
        let state = self.lock()?;
        state.check_available()?;
        Ok(T::table(&state)
            .values()
            .filter(|o| filter(o))
            .cloned()
            .collect())
    }

    fn write<T: MemoryKind>(&self, ctx: &AccessContext, object: &T, mode: WriteMode) -> Result<()> {
        ctx.check_deadline()?;
        ctx.require_write()?;
        let id = object.identity().id;
        let mut state = self.lock()?;
        state.check_available()?;
        state.check_injected(T::KIND, &id)?;

        match T::table(&state).get(&id) {
            Some(_) if mode == WriteMode::Add => {
                return Err(StoreError::AlreadyExists { kind: T::KIND, id });
            }
            Some(existing) if existing == object => return Ok(()),
            Some(existing) => ctx.check_mutable(T::KIND, &id, existing.traits())?,
            None if mode == WriteMode::Update => {
                return Err(StoreError::NotFound { kind: T::KIND, id });
            }
            None => {}
        }
        ctx.check_origin(T::KIND, &id, object.traits())?;
        object.check_references(&state)?;

        T::table_mut(&mut state).insert(id.clone(), object.clone());
        state.record(StoreOp::Upsert, T::KIND, &id);
        Ok(())
    }

    fn delete<T: MemoryKind>(&self, ctx: &AccessContext, id: &str) -> Result<()> {
        ctx.check_deadline()?;
        ctx.require_write()?;
        let mut state = self.lock()?;
        state.check_available()?;
        state.check_injected(T::KIND, id)?;

        let existing = T::table(&state).get(id).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
        ctx.check_mutable(T::KIND, id, existing.traits())?;
        if let Some(referrer) = T::referrer(&state, id) {
            return Err(StoreError::ReferencedByAnotherObject {
                kind: T::KIND,
                id: id.to_string(),
                referrer,
            });
        }

        T::table_mut(&mut state).remove(id);
        state.record(StoreOp::Remove, T::KIND, id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection and fault injection
    // ------------------------------------------------------------------

    /// All stored objects of one kind, bypassing access checks.
    pub fn objects<T: MemoryKind>(&self) -> Vec<T> {
        self.lock()
            .map(|state| T::table(&state).values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of table writes that changed stored state.
    pub fn write_count(&self) -> usize {
        self.lock().map(|state| state.writes).unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<StoreEvent> {
        self.lock()
            .map(|state| state.journal.clone())
            .unwrap_or_default()
    }

    pub fn registered_providers(&self) -> BTreeSet<String> {
        self.lock()
            .map(|state| state.registered_providers.clone())
            .unwrap_or_default()
    }

    pub fn runtime_notifiers(&self) -> BTreeSet<String> {
        self.lock()
            .map(|state| state.runtime_notifiers.clone())
            .unwrap_or_default()
    }

    pub fn integration_health(&self) -> BTreeSet<String> {
        self.lock()
            .map(|state| state.integration_health.clone())
            .unwrap_or_default()
    }

    /// Notifier ids attached to a policy.
    pub fn policy_notifiers(&self, policy: &str) -> BTreeSet<String> {
        self.lock()
            .ok()
            .and_then(|state| state.policy_notifiers.get(policy).cloned())
            .unwrap_or_default()
    }

    /// Attaches a notifier to a policy. Detachable by the policy cleaner.
    pub fn attach_notifier_to_policy(&self, policy: &str, notifier_id: &str) {
        if let Ok(mut state) = self.lock() {
            state
                .policy_notifiers
                .entry(policy.to_string())
                .or_default()
                .insert(notifier_id.to_string());
        }
    }

    /// Adds a reference to a notifier that no cleanup step removes.
    pub fn pin_notifier(&self, notifier_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.pinned_notifiers.insert(notifier_id.to_string());
        }
    }

    pub fn unpin_notifier(&self, notifier_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.pinned_notifiers.remove(notifier_id);
        }
    }

    pub fn register_integration_health(&self, integration_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.integration_health.insert(integration_id.to_string());
        }
    }

    /// Makes writes and removals of one object fail with `error`.
    pub fn inject_failure(&self, kind: ResourceKind, id: &str, error: StoreError) {
        if let Ok(mut state) = self.lock() {
            state.failures.insert((kind, id.to_string()), error);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.lock() {
            state.failures.clear();
        }
    }

    /// Makes every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.lock() {
            state.unavailable = unavailable;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Add,
    Update,
    Upsert,
}

#[async_trait]
impl<T: MemoryKind> ObjectStore<T> for MemoryStore {
    async fn get(&self, ctx: &AccessContext, id: &str) -> Result<Option<T>> {
        self.read(ctx, id)
    }

    async fn get_filtered(&self, ctx: &AccessContext, filter: Filter<'_, T>) -> Result<Vec<T>> {
        self.read_filtered(ctx, filter)
    }

    async fn add(&self, ctx: &AccessContext, object: &T) -> Result<()> {
        self.write(ctx, object, WriteMode::Add)
    }

    async fn update(&self, ctx: &AccessContext, object: &T) -> Result<()> {
        self.write(ctx, object, WriteMode::Update)
    }

    async fn upsert(&self, ctx: &AccessContext, object: &T) -> Result<()> {
        self.write(ctx, object, WriteMode::Upsert)
    }

    async fn remove(&self, ctx: &AccessContext, id: &str) -> Result<()> {
        self.delete::<T>(ctx, id)
    }
}

impl MemoryStore {
    fn remove_provider_groups(&self, ctx: &AccessContext, provider_id: &str) -> Result<usize> {
        ctx.check_deadline()?;
        ctx.require_write()?;
        if !ctx.is_forced() {
            return Err(StoreError::NotAuthorized(
                "removing all groups of a provider requires force".to_string(),
            ));
        }
        let mut state = self.lock()?;
        state.check_available()?;
        let ids: Vec<String> = state
            .groups
            .values()
            .filter(|g| g.auth_provider_id == provider_id)
            .map(|g| g.id.clone())
            .collect();
        for id in &ids {
            state.groups.remove(id);
            state.record(StoreOp::Remove, ResourceKind::Group, id);
        }
        Ok(ids.len())
    }

    fn set_registration(&self, ctx: &AccessContext, id: &str, registered: bool) -> Result<()> {
        ctx.check_deadline()?;
        ctx.require_write()?;
        let mut state = self.lock()?;
        state.check_available()?;
        if registered {
            state.registered_providers.insert(id.to_string());
            state.record(StoreOp::Register, ResourceKind::AuthProvider, id);
        } else if state.registered_providers.remove(id) {
            state.record(StoreOp::Unregister, ResourceKind::AuthProvider, id);
        }
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn remove_all_for_provider(
        &self,
        ctx: &AccessContext,
        provider_id: &str,
    ) -> Result<usize> {
        self.remove_provider_groups(ctx, provider_id)
    }
}

#[async_trait]
impl ProviderRegistry for MemoryStore {
    async fn register(&self, ctx: &AccessContext, provider: &AuthProvider) -> Result<()> {
        self.set_registration(ctx, &provider.id, true)
    }

    async fn unregister(&self, ctx: &AccessContext, provider_id: &str) -> Result<()> {
        self.set_registration(ctx, provider_id, false)
    }
}

impl NotificationProcessor for MemoryStore {
    fn update_notifier(&self, notifier: &Notifier) {
        if let Ok(mut state) = self.lock() {
            state.runtime_notifiers.insert(notifier.id.clone());
            state.record(StoreOp::Register, ResourceKind::Notifier, &notifier.id);
        }
    }

    fn remove_notifier(&self, notifier_id: &str) {
        if let Ok(mut state) = self.lock() {
            if state.runtime_notifiers.remove(notifier_id) {
                state.record(StoreOp::Unregister, ResourceKind::Notifier, notifier_id);
            }
        }
    }
}

impl MemoryStore {
    fn detach(&self, ctx: &AccessContext, notifier_id: &str) -> Result<()> {
        ctx.check_deadline()?;
        ctx.require_write()?;
        let mut state = self.lock()?;
        state.check_available()?;
        for notifiers in state.policy_notifiers.values_mut() {
            notifiers.remove(notifier_id);
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyCleaner for MemoryStore {
    async fn detach_notifier(&self, ctx: &AccessContext, notifier_id: &str) -> Result<()> {
        self.detach(ctx, notifier_id)
    }
}

impl IntegrationHealthReporter for MemoryStore {
    fn remove_integration_health(&self, integration_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check_available()?;
        state.integration_health.remove(integration_id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

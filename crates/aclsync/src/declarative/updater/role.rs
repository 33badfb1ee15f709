//! Role updater.
//!
//! Roles are keyed by name. Before a role is removed the configured
//! [`RoleCleaner`] runs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{DeclaredObject, Role};
use crate::store::{AccessContext, RoleCleaner, RoleStore, StoreError};

pub struct RoleUpdater {
    roles: Arc<RoleStore>,
    cleaner: Arc<dyn RoleCleaner>,
}

impl RoleUpdater {
    pub fn new(roles: Arc<RoleStore>, cleaner: Arc<dyn RoleCleaner>) -> Self {
        Self { roles, cleaner }
    }
}

#[async_trait]
impl ResourceUpdater for RoleUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::Role(role) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.roles.as_ref(), ctx, role).await?;
        Ok(())
    }

    async fn delete_resources(
        &self,
        ctx: &AccessContext,
        ids_to_skip: &HashSet<String>,
    ) -> DeletionOutcome {
        sweep(self, ctx, ids_to_skip).await
    }
}

#[async_trait]
impl Sweep for RoleUpdater {
    type Object = Role;

    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<Role>, StoreError> {
        list_declarative(self.roles.as_ref(), ctx).await
    }

    async fn cleanup(&self, ctx: &AccessContext, role: &Role) -> Result<(), UpdateError> {
        self.cleaner.cleanup_role(ctx, role).await?;
        Ok(())
    }

    async fn remove(&self, ctx: &AccessContext, role: &Role) -> Result<(), UpdateError> {
        self.roles.remove(ctx, &role.name).await?;
        Ok(())
    }

    async fn orphan(&self, ctx: &AccessContext, role: &Role) -> Result<(), StoreError> {
        self.roles.upsert(ctx, role).await
    }
}

//! Access scope updater.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{AccessScope, DeclaredObject};
use crate::store::{AccessContext, AccessScopeStore, StoreError};

pub struct AccessScopeUpdater {
    scopes: Arc<AccessScopeStore>,
}

impl AccessScopeUpdater {
    pub fn new(scopes: Arc<AccessScopeStore>) -> Self {
        Self { scopes }
    }
}

#[async_trait]
impl ResourceUpdater for AccessScopeUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AccessScope
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::AccessScope(scope) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.scopes.as_ref(), ctx, scope).await?;
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
impl Sweep for AccessScopeUpdater {
    type Object = AccessScope;

    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<AccessScope>, StoreError> {
        list_declarative(self.scopes.as_ref(), ctx).await
    }

    async fn remove(&self, ctx: &AccessContext, scope: &AccessScope) -> Result<(), UpdateError> {
        self.scopes.remove(ctx, &scope.id).await?;
        Ok(())
    }

    async fn orphan(&self, ctx: &AccessContext, scope: &AccessScope) -> Result<(), StoreError> {
        self.scopes.upsert(ctx, scope).await
    }
}

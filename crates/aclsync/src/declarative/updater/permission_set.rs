//! Permission set updater.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{DeclaredObject, PermissionSet};
use crate::store::{AccessContext, PermissionSetStore, StoreError};

pub struct PermissionSetUpdater {
    permission_sets: Arc<PermissionSetStore>,
}

impl PermissionSetUpdater {
    pub fn new(permission_sets: Arc<PermissionSetStore>) -> Self {
        Self { permission_sets }
    }
}

#[async_trait]
impl ResourceUpdater for PermissionSetUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PermissionSet
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::PermissionSet(permission_set) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.permission_sets.as_ref(), ctx, permission_set).await?;
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
impl Sweep for PermissionSetUpdater {
    type Object = PermissionSet;

    async fn list_declarative(
        &self,
        ctx: &AccessContext,
    ) -> Result<Vec<PermissionSet>, StoreError> {
        list_declarative(self.permission_sets.as_ref(), ctx).await
    }

    async fn remove(&self, ctx: &AccessContext, ps: &PermissionSet) -> Result<(), UpdateError> {
        self.permission_sets.remove(ctx, &ps.id).await?;
        Ok(())
    }

    async fn orphan(&self, ctx: &AccessContext, ps: &PermissionSet) -> Result<(), StoreError> {
        self.permission_sets.upsert(ctx, ps).await
    }
}

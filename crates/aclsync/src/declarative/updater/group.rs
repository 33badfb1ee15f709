//! Group updater.
//!
//! Groups are removed with a forced context. A group that is already gone
//! (removed together with its auth provider) counts as removed.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{DeclaredObject, Group};
use crate::store::{AccessContext, GroupStore, StoreError};

pub struct GroupUpdater {
    groups: Arc<dyn GroupStore>,
}

impl GroupUpdater {
    pub fn new(groups: Arc<dyn GroupStore>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl ResourceUpdater for GroupUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Group
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::Group(group) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.groups.as_ref(), ctx, group).await?;
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
impl Sweep for GroupUpdater {
    type Object = Group;

    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<Group>, StoreError> {
        list_declarative(self.groups.as_ref(), ctx).await
    }

    async fn remove(&self, ctx: &AccessContext, group: &Group) -> Result<(), UpdateError> {
        let forced = ctx.clone().with_force();
        match self.groups.as_ref().remove(&forced, &group.id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }

    async fn orphan(&self, ctx: &AccessContext, group: &Group) -> Result<(), StoreError> {
        self.groups.as_ref().upsert(&ctx.clone().with_force(), group).await
    }
}

//! Notifier updater.
//!
//! Keeps the notification runtime in sync with stored notifiers. Before a
//! notifier is removed it is detached from policies and its integration
//! health registration is dropped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{DeclaredObject, Notifier};
use crate::store::{
    AccessContext, IntegrationHealthReporter, NotificationProcessor, NotifierStore,
    PolicyCleaner, StoreError,
};

pub struct NotifierUpdater {
    notifiers: Arc<NotifierStore>,
    processor: Arc<dyn NotificationProcessor>,
    policies: Arc<dyn PolicyCleaner>,
    integration_health: Arc<dyn IntegrationHealthReporter>,
}

impl NotifierUpdater {
    pub fn new(
        notifiers: Arc<NotifierStore>,
        processor: Arc<dyn NotificationProcessor>,
        policies: Arc<dyn PolicyCleaner>,
        integration_health: Arc<dyn IntegrationHealthReporter>,
    ) -> Self {
        Self {
            notifiers,
            processor,
            policies,
            integration_health,
        }
    }
}

#[async_trait]
impl ResourceUpdater for NotifierUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Notifier
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::Notifier(notifier) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.notifiers.as_ref(), ctx, notifier).await?;
        self.processor.update_notifier(notifier);
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
impl Sweep for NotifierUpdater {
    type Object = Notifier;

    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<Notifier>, StoreError> {
        list_declarative(self.notifiers.as_ref(), ctx).await
    }

    async fn cleanup(&self, ctx: &AccessContext, notifier: &Notifier) -> Result<(), UpdateError> {
        self.policies.detach_notifier(ctx, &notifier.id).await?;
        self.integration_health
            .remove_integration_health(&notifier.id)?;
        Ok(())
    }

    async fn remove(&self, ctx: &AccessContext, notifier: &Notifier) -> Result<(), UpdateError> {
        self.notifiers.remove(ctx, &notifier.id).await?;
        self.processor.remove_notifier(&notifier.id);
        Ok(())
    }

    async fn orphan(&self, ctx: &AccessContext, notifier: &Notifier) -> Result<(), StoreError> {
        self.notifiers.upsert(ctx, notifier).await
    }
}

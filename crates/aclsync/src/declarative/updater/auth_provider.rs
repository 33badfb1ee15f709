//! Auth provider updater.
//!
//! Besides the stored provider, the live provider registry is kept in sync:
//! an upsert re-registers the provider, a removal cascades to the provider's
//! groups and unregisters it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{AuthProvider, DeclaredObject};
use crate::store::{AccessContext, AuthProviderStore, GroupStore, ProviderRegistry, StoreError};

pub struct AuthProviderUpdater {
    providers: Arc<AuthProviderStore>,
    groups: Arc<dyn GroupStore>,
    registry: Arc<dyn ProviderRegistry>,
}

impl AuthProviderUpdater {
    pub fn new(
        providers: Arc<AuthProviderStore>,
        groups: Arc<dyn GroupStore>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self {
            providers,
            groups,
            registry,
        }
    }
}

#[async_trait]
impl ResourceUpdater for AuthProviderUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AuthProvider
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::AuthProvider(provider) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        upsert_if_changed(self.providers.as_ref(), ctx, provider).await?;
        self.registry.unregister(ctx, &provider.id).await?;
        self.registry.register(ctx, provider).await?;
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
impl Sweep for AuthProviderUpdater {
    type Object = AuthProvider;

    async fn list_declarative(&self, ctx: &AccessContext) -> Result<Vec<AuthProvider>, StoreError> {
        list_declarative(self.providers.as_ref(), ctx).await
    }

    async fn cleanup(&self, ctx: &AccessContext, provider: &AuthProvider) -> Result<(), UpdateError> {
        let removed = self
            .groups
            .remove_all_for_provider(&ctx.clone().with_force(), &provider.id)
            .await?;
        if removed > 0 {
            log::debug!(
                "Removed {} group(s) of auth provider '{}'",
                removed,
                provider.name
            );
        }
        Ok(())
    }

    async fn remove(&self, ctx: &AccessContext, provider: &AuthProvider) -> Result<(), UpdateError> {
        self.providers
            .remove(&ctx.clone().with_force(), &provider.id)
            .await?;
        self.registry.unregister(ctx, &provider.id).await?;
        Ok(())
    }

    async fn orphan(&self, ctx: &AccessContext, provider: &AuthProvider) -> Result<(), StoreError> {
        self.providers.upsert(&ctx.clone().with_force(), provider).await
    }
}

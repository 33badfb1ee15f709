//! Machine-to-machine auth config updater.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    kind_mismatch, list_declarative, sweep, upsert_if_changed, DeletionOutcome, ResourceUpdater,
    Sweep, UpdateError,
};
use crate::declarative::resource::ResourceKind;
use crate::model::{AuthMachineToMachineConfig, DeclaredObject};
use crate::store::{AccessContext, M2mConfigStore, RoleStore, StoreError};

pub struct M2mConfigUpdater {
    configs: Arc<M2mConfigStore>,
    roles: Arc<RoleStore>,
}

impl M2mConfigUpdater {
    pub fn new(configs: Arc<M2mConfigStore>, roles: Arc<RoleStore>) -> Self {
        Self { configs, roles }
    }

    /// Every mapped role must exist before the config is written.
    async fn check_roles(
        &self,
        ctx: &AccessContext,
        config: &AuthMachineToMachineConfig,
    ) -> Result<(), UpdateError> {
        for mapping in &config.mappings {
            if self.roles.get(ctx, &mapping.role).await?.is_none() {
                return Err(UpdateError::MissingDependency {
                    kind: ResourceKind::AuthMachineToMachineConfig,
                    id: config.id.clone(),
                    dependency: ResourceKind::Role,
                    name: mapping.role.clone(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceUpdater for M2mConfigUpdater {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AuthMachineToMachineConfig
    }

    async fn upsert(&self, ctx: &AccessContext, object: &DeclaredObject) -> Result<(), UpdateError> {
        let DeclaredObject::AuthMachineToMachineConfig(config) = object else {
            return Err(kind_mismatch(self.kind(), object));
        };
        self.check_roles(ctx, config).await?;
        upsert_if_changed(self.configs.as_ref(), ctx, config).await?;
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
impl Sweep for M2mConfigUpdater {
    type Object = AuthMachineToMachineConfig;

    async fn list_declarative(
        &self,
        ctx: &AccessContext,
    ) -> Result<Vec<AuthMachineToMachineConfig>, StoreError> {
        list_declarative(self.configs.as_ref(), ctx).await
    }

    async fn remove(
        &self,
        ctx: &AccessContext,
        config: &AuthMachineToMachineConfig,
    ) -> Result<(), UpdateError> {
        self.configs.remove(ctx, &config.id).await?;
        Ok(())
    }

    async fn orphan(
        &self,
        ctx: &AccessContext,
        config: &AuthMachineToMachineConfig,
    ) -> Result<(), StoreError> {
        self.configs.upsert(ctx, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{M2mConfigType, M2mMapping, Traits};
    use crate::store::MemoryStore;

    fn config(role: &str) -> AuthMachineToMachineConfig {
        AuthMachineToMachineConfig {
            id: "m2m".to_string(),
            config_type: M2mConfigType::Generic,
            issuer: "https://issuer.example.com".to_string(),
            token_expiration_duration: "5m".to_string(),
            mappings: vec![M2mMapping {
                key: "sub".to_string(),
                value_expression: "ci-.*".to_string(),
                role: role.to_string(),
            }],
            traits: Traits::declarative(),
        }
    }

    #[tokio::test]
    async fn test_missing_role_is_a_dependency_error() {
        let store = Arc::new(MemoryStore::new());
        let updater = M2mConfigUpdater::new(store.clone(), store.clone());
        let err = updater
            .upsert(
                &AccessContext::declarative(),
                &DeclaredObject::AuthMachineToMachineConfig(config("Continuous Integration")),
            )
            .await
            .unwrap_err();
        match err {
            UpdateError::MissingDependency {
                dependency, name, ..
            } => {
                assert_eq!(dependency, ResourceKind::Role);
                assert_eq!(name, "Continuous Integration");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.write_count(), 0);
    }
}

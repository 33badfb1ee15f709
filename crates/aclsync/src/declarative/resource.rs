//! Declaration types as they appear in the watched directory.
//!
//! A declaration is a YAML mapping carrying a `kind` tag. Declarations are
//! converted into the stored objects of [`crate::model`]; an auth provider
//! declaration expands into the provider plus its groups.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::{DeclarativeError, Result};
use super::ids;
use crate::model::{
    Access, AccessScope, AuthMachineToMachineConfig, AuthProvider, DeclaredObject, Group,
    M2mConfigType, M2mMapping, NamespaceRef, Notifier, Origin, PermissionSet, RequiredAttribute,
    Role, ScopeRules, Traits,
};

/// The closed set of object kinds the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    AccessScope,
    PermissionSet,
    Role,
    AuthProvider,
    Group,
    Notifier,
    AuthMachineToMachineConfig,
}

impl ResourceKind {
    /// Returns all resource kinds.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::AccessScope,
            ResourceKind::PermissionSet,
            ResourceKind::Role,
            ResourceKind::AuthProvider,
            ResourceKind::Group,
            ResourceKind::Notifier,
            ResourceKind::AuthMachineToMachineConfig,
        ]
    }

    /// Whether this kind can appear as a `kind:` tag in a declaration file.
    ///
    /// Groups are only produced by auth provider declarations.
    pub fn is_declarable(&self) -> bool {
        !matches!(self, ResourceKind::Group)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::AccessScope => write!(f, "AccessScope"),
            ResourceKind::PermissionSet => write!(f, "PermissionSet"),
            ResourceKind::Role => write!(f, "Role"),
            ResourceKind::AuthProvider => write!(f, "AuthProvider"),
            ResourceKind::Group => write!(f, "Group"),
            ResourceKind::Notifier => write!(f, "Notifier"),
            ResourceKind::AuthMachineToMachineConfig => write!(f, "AuthMachineToMachineConfig"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "accessscope" => Ok(ResourceKind::AccessScope),
            "permissionset" => Ok(ResourceKind::PermissionSet),
            "role" => Ok(ResourceKind::Role),
            "authprovider" => Ok(ResourceKind::AuthProvider),
            "group" => Ok(ResourceKind::Group),
            "notifier" => Ok(ResourceKind::Notifier),
            "authmachinetomachineconfig" | "m2mconfig" => {
                Ok(ResourceKind::AuthMachineToMachineConfig)
            }
            _ => Err(format!("Unknown resource kind: {}", s)),
        }
    }
}

// ============================================================================
// Access scopes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceDeclaration {
    pub cluster: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesDeclaration {
    #[serde(default)]
    pub included_clusters: Vec<String>,
    #[serde(default)]
    pub included_namespaces: Vec<NamespaceDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessScopeDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: RulesDeclaration,
}

// ============================================================================
// Permission sets
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceAccessDeclaration {
    pub resource: String,
    pub access: Access,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSetDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resources: Vec<ResourceAccessDeclaration>,
}

// ============================================================================
// Roles
// ============================================================================

/// A role refers to its permission set and access scope by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub permission_set: String,
    pub access_scope: String,
}

// ============================================================================
// Auth providers
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GroupDeclaration {
    pub key: String,
    pub value: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDeclaration {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProviderDeclaration {
    pub name: String,
    #[serde(default = "default_provider_type", rename = "type")]
    pub provider_type: String,
    pub ui_endpoint: String,
    #[serde(default, rename = "extraUIEndpoints", alias = "extraUiEndpoints")]
    pub extra_ui_endpoints: Vec<String>,
    #[serde(default)]
    pub minimum_role: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupDeclaration>,
    #[serde(default)]
    pub required_attributes: Vec<AttributeDeclaration>,
    #[serde(default)]
    pub claim_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn default_provider_type() -> String {
    "oidc".to_string()
}

// ============================================================================
// Notifiers
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub notifier_type: String,
    #[serde(default)]
    pub ui_endpoint: String,
    #[serde(default)]
    pub label_key: String,
    #[serde(default)]
    pub label_default: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

// ============================================================================
// Machine-to-machine configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDeclaration {
    pub key: String,
    pub value_expression: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct M2mConfigDeclaration {
    #[serde(rename = "type")]
    pub config_type: M2mConfigType,
    pub issuer: String,
    #[serde(default = "default_token_expiration")]
    pub token_expiration_duration: String,
    #[serde(default)]
    pub mappings: Vec<MappingDeclaration>,
}

fn default_token_expiration() -> String {
    "1h".to_string()
}

// ============================================================================
// Any declaration
// ============================================================================

/// A parsed declaration of any kind.
#[derive(Debug, Clone)]
pub enum Declaration {
    AccessScope(AccessScopeDeclaration),
    PermissionSet(PermissionSetDeclaration),
    Role(RoleDeclaration),
    AuthProvider(AuthProviderDeclaration),
    Notifier(NotifierDeclaration),
    AuthMachineToMachineConfig(M2mConfigDeclaration),
}

/// Intermediate struct for reading the kind tag before the body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeclarationHeader {
    pub kind: String,
}

fn require(kind: ResourceKind, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DeclarativeError::MissingIdentity {
            kind,
            field: field.to_string(),
        });
    }
    Ok(())
}

impl Declaration {
    /// Decodes the body of a declaration whose kind is already known.
    pub fn from_value(kind: ResourceKind, value: serde_yaml::Value) -> Result<Self> {
        let invalid = |e: serde_yaml::Error| DeclarativeError::InvalidDeclaration {
            kind,
            message: e.to_string(),
        };
        match kind {
            ResourceKind::AccessScope => serde_yaml::from_value(value)
                .map(Declaration::AccessScope)
                .map_err(invalid),
            ResourceKind::PermissionSet => serde_yaml::from_value(value)
                .map(Declaration::PermissionSet)
                .map_err(invalid),
            ResourceKind::Role => serde_yaml::from_value(value)
                .map(Declaration::Role)
                .map_err(invalid),
            ResourceKind::AuthProvider => serde_yaml::from_value(value)
                .map(Declaration::AuthProvider)
                .map_err(invalid),
            ResourceKind::Notifier => serde_yaml::from_value(value)
                .map(Declaration::Notifier)
                .map_err(invalid),
            ResourceKind::AuthMachineToMachineConfig => serde_yaml::from_value(value)
                .map(Declaration::AuthMachineToMachineConfig)
                .map_err(invalid),
            ResourceKind::Group => Err(DeclarativeError::UndeclarableKind(kind)),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Declaration::AccessScope(_) => ResourceKind::AccessScope,
            Declaration::PermissionSet(_) => ResourceKind::PermissionSet,
            Declaration::Role(_) => ResourceKind::Role,
            Declaration::AuthProvider(_) => ResourceKind::AuthProvider,
            Declaration::Notifier(_) => ResourceKind::Notifier,
            Declaration::AuthMachineToMachineConfig(_) => ResourceKind::AuthMachineToMachineConfig,
        }
    }

    /// Converts the declaration into the stored objects it describes.
    pub fn into_objects(self) -> Result<Vec<DeclaredObject>> {
        let traits = Traits::declarative();
        let objects = match self {
            Declaration::AccessScope(d) => {
                require(ResourceKind::AccessScope, "name", &d.name)?;
                vec![DeclaredObject::AccessScope(AccessScope {
                    id: ids::access_scope_id(&d.name),
                    name: d.name,
                    description: d.description,
                    rules: ScopeRules {
                        included_clusters: d.rules.included_clusters,
                        included_namespaces: d
                            .rules
                            .included_namespaces
                            .into_iter()
                            .map(|ns| NamespaceRef {
                                cluster_name: ns.cluster,
                                namespace_name: ns.namespace,
                            })
                            .collect(),
                    },
                    traits,
                })]
            }
            Declaration::PermissionSet(d) => {
                require(ResourceKind::PermissionSet, "name", &d.name)?;
                vec![DeclaredObject::PermissionSet(PermissionSet {
                    id: ids::permission_set_id(&d.name),
                    name: d.name,
                    description: d.description,
                    resource_to_access: d
                        .resources
                        .into_iter()
                        .map(|r| (r.resource, r.access))
                        .collect(),
                    traits,
                })]
            }
            Declaration::Role(d) => {
                require(ResourceKind::Role, "name", &d.name)?;
                require(ResourceKind::Role, "permissionSet", &d.permission_set)?;
                require(ResourceKind::Role, "accessScope", &d.access_scope)?;
                vec![DeclaredObject::Role(Role {
                    permission_set_id: ids::permission_set_id(&d.permission_set),
                    access_scope_id: ids::access_scope_id(&d.access_scope),
                    name: d.name,
                    description: d.description,
                    traits,
                })]
            }
            Declaration::AuthProvider(d) => expand_auth_provider(d, traits)?,
            Declaration::Notifier(d) => {
                require(ResourceKind::Notifier, "name", &d.name)?;
                vec![DeclaredObject::Notifier(Notifier {
                    id: ids::notifier_id(&d.name),
                    name: d.name,
                    notifier_type: d.notifier_type,
                    ui_endpoint: d.ui_endpoint,
                    label_key: d.label_key,
                    label_default: d.label_default,
                    config: d.config,
                    traits,
                })]
            }
            Declaration::AuthMachineToMachineConfig(d) => {
                require(ResourceKind::AuthMachineToMachineConfig, "issuer", &d.issuer)?;
                vec![DeclaredObject::AuthMachineToMachineConfig(
                    AuthMachineToMachineConfig {
                        id: ids::m2m_config_id(&d.issuer),
                        config_type: d.config_type,
                        issuer: d.issuer,
                        token_expiration_duration: d.token_expiration_duration,
                        mappings: d
                            .mappings
                            .into_iter()
                            .map(|m| M2mMapping {
                                key: m.key,
                                value_expression: m.value_expression,
                                role: m.role,
                            })
                            .collect(),
                        traits,
                    },
                )]
            }
        };
        Ok(objects)
    }
}

/// An auth provider declaration yields the provider, one group per mapping
/// and a default group when a minimum role is set.
fn expand_auth_provider(d: AuthProviderDeclaration, traits: Traits) -> Result<Vec<DeclaredObject>> {
    require(ResourceKind::AuthProvider, "name", &d.name)?;
    let provider_id = ids::auth_provider_id(&d.name);

    let mut groups = Vec::new();
    if let Some(role) = d.minimum_role.as_deref().filter(|r| !r.trim().is_empty()) {
        groups.push(group(&provider_id, "", "", role, traits));
    }
    for g in &d.groups {
        require(ResourceKind::Group, "role", &g.role)?;
        groups.push(group(&provider_id, &g.key, &g.value, &g.role, traits));
    }
    // A mapping repeated, or restating the default group, is the same group.
    let mut seen = HashSet::new();
    groups.retain(|g| seen.insert(g.id.clone()));

    let provider = AuthProvider {
        id: provider_id,
        name: d.name,
        provider_type: d.provider_type,
        ui_endpoint: d.ui_endpoint,
        extra_ui_endpoints: d.extra_ui_endpoints,
        enabled: true,
        config: d.config,
        required_attributes: d
            .required_attributes
            .into_iter()
            .map(|a| RequiredAttribute {
                attribute_key: a.key,
                attribute_value: a.value,
            })
            .collect(),
        claim_mappings: d.claim_mappings,
        traits,
    };

    let mut objects = vec![DeclaredObject::AuthProvider(provider)];
    objects.extend(groups.into_iter().map(DeclaredObject::Group));
    Ok(objects)
}

fn group(provider_id: &str, key: &str, value: &str, role: &str, traits: Traits) -> Group {
    Group {
        id: ids::group_id(provider_id, key, value, role),
        auth_provider_id: provider_id.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        role_name: role.to_string(),
        traits,
    }
}

// ============================================================================
// Declared resource
// ============================================================================

/// A desired object together with the file that declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredResource {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub origin: Origin,
    /// Name of the file that declared this resource.
    pub handler: String,
    pub object: DeclaredObject,
}

impl DeclaredResource {
    pub fn new(handler: impl Into<String>, object: DeclaredObject) -> Self {
        let identity = object.identity();
        Self {
            kind: object.kind(),
            id: identity.id,
            name: identity.name,
            origin: object.traits().origin,
            handler: handler.into(),
            object,
        }
    }

    pub fn health_id(&self) -> String {
        self.object.health_id()
    }
}

// ============================================================================
// Tests
// ============================================================================

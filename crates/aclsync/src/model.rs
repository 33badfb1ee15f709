//! Access-control objects as the collaborator stores hold them.
//!
//! Every object carries [`Traits`] recording who owns it (origin) and how
//! strictly it is protected against mutation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::declarative::ids;
use crate::declarative::resource::ResourceKind;

/// Who created an object and therefore who may mutate it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Bootstrapped by the system itself.
    Default,
    /// Created through the interactive API.
    #[default]
    Imperative,
    /// Created from mounted declarative configuration.
    Declarative,
    /// Declarative object whose removal is blocked by a reference.
    DeclarativeOrphaned,
}

impl Origin {
    /// Whether the declarative path owns objects with this origin.
    pub fn is_declarative(self) -> bool {
        matches!(self, Origin::Declarative | Origin::DeclarativeOrphaned)
    }

    /// Whether the imperative path owns objects with this origin.
    pub fn is_imperative(self) -> bool {
        matches!(self, Origin::Default | Origin::Imperative)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Default => write!(f, "DEFAULT"),
            Origin::Imperative => write!(f, "IMPERATIVE"),
            Origin::Declarative => write!(f, "DECLARATIVE"),
            Origin::DeclarativeOrphaned => write!(f, "DECLARATIVE_ORPHANED"),
        }
    }
}

/// How strictly an object is protected against updates and removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutabilityMode {
    #[default]
    AllowMutate,
    /// Updates and removal require an explicit force flag.
    AllowMutateForced,
}

/// Ownership metadata attached to every managed object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traits {
    pub origin: Origin,
    #[serde(default)]
    pub mutability_mode: MutabilityMode,
}

impl Traits {
    /// Traits of an object produced from declarative configuration.
    pub fn declarative() -> Self {
        Self {
            origin: Origin::Declarative,
            mutability_mode: MutabilityMode::AllowMutate,
        }
    }

    /// Traits of an object created through the interactive API.
    pub fn imperative() -> Self {
        Self {
            origin: Origin::Imperative,
            mutability_mode: MutabilityMode::AllowMutate,
        }
    }

    pub fn with_mutability(mut self, mode: MutabilityMode) -> Self {
        self.mutability_mode = mode;
        self
    }
}

/// Stable identifier plus a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    /// Builds an identity, using the id as the name when the name is blank.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        let name = if name.trim().is_empty() {
            id.clone()
        } else {
            name
        };
        Self { id, name }
    }
}

/// Identity and ownership capability shared by every stored object kind.
pub trait Identify {
    /// The kind of object.
    const KIND: ResourceKind;

    /// The store key and display name.
    fn identity(&self) -> Identity;

    fn traits(&self) -> &Traits;

    fn traits_mut(&mut self) -> &mut Traits;

    /// Key under which health is recorded. Defaults to the store key.
    fn health_id(&self) -> String {
        self.identity().id
    }
}

// ============================================================================
// Access scopes
// ============================================================================

/// A cluster/namespace pair included in an access scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRef {
    pub cluster_name: String,
    pub namespace_name: String,
}

/// Selection rules of an access scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRules {
    #[serde(default)]
    pub included_clusters: Vec<String>,
    #[serde(default)]
    pub included_namespaces: Vec<NamespaceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessScope {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: ScopeRules,
    pub traits: Traits,
}

impl Identify for AccessScope {
    const KIND: ResourceKind = ResourceKind::AccessScope;

    fn identity(&self) -> Identity {
        Identity::new(&self.id, &self.name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

// ============================================================================
// Permission sets
// ============================================================================

/// Access level granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Access {
    NoAccess,
    ReadAccess,
    ReadWriteAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource_to_access: BTreeMap<String, Access>,
    pub traits: Traits,
}

impl Identify for PermissionSet {
    const KIND: ResourceKind = ResourceKind::PermissionSet;

    fn identity(&self) -> Identity {
        Identity::new(&self.id, &self.name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

// ============================================================================
// Roles
// ============================================================================

/// A role binds a permission set to an access scope. Roles are keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permission_set_id: String,
    pub access_scope_id: String,
    pub traits: Traits,
}

impl Identify for Role {
    const KIND: ResourceKind = ResourceKind::Role;

    fn identity(&self) -> Identity {
        Identity::new(&self.name, &self.name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }

    fn health_id(&self) -> String {
        ids::role_health_id(&self.name)
    }
}

// ============================================================================
// Auth providers and groups
// ============================================================================

/// An attribute a user must carry to log in through a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredAttribute {
    pub attribute_key: String,
    pub attribute_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProvider {
    pub id: String,
    pub name: String,
    pub provider_type: String,
    pub ui_endpoint: String,
    pub extra_ui_endpoints: Vec<String>,
    pub enabled: bool,
    pub config: BTreeMap<String, String>,
    pub required_attributes: Vec<RequiredAttribute>,
    pub claim_mappings: BTreeMap<String, String>,
    pub traits: Traits,
}

impl Identify for AuthProvider {
    const KIND: ResourceKind = ResourceKind::AuthProvider;

    fn identity(&self) -> Identity {
        Identity::new(&self.id, &self.name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

/// Maps users of an auth provider carrying `key=value` onto a role.
///
/// An empty key and value make the group the provider's default (minimum)
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub auth_provider_id: String,
    pub key: String,
    pub value: String,
    pub role_name: String,
    pub traits: Traits,
}

impl Group {
    pub fn is_default(&self) -> bool {
        self.key.is_empty() && self.value.is_empty()
    }
}

impl Identify for Group {
    const KIND: ResourceKind = ResourceKind::Group;

    fn identity(&self) -> Identity {
        let name = if self.is_default() {
            format!("{} -> {}", self.auth_provider_id, self.role_name)
        } else {
            format!(
                "{}:{}={} -> {}",
                self.auth_provider_id, self.key, self.value, self.role_name
            )
        };
        Identity::new(&self.id, name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

// ============================================================================
// Notifiers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifier {
    pub id: String,
    pub name: String,
    pub notifier_type: String,
    pub ui_endpoint: String,
    pub label_key: String,
    pub label_default: String,
    pub config: BTreeMap<String, String>,
    pub traits: Traits,
}

impl Identify for Notifier {
    const KIND: ResourceKind = ResourceKind::Notifier;

    fn identity(&self) -> Identity {
        Identity::new(&self.id, &self.name)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

// ============================================================================
// Machine-to-machine auth configs
// ============================================================================

/// Token issuer family of an M2M config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum M2mConfigType {
    Generic,
    GithubActions,
    KubeServiceAccount,
}

/// Grants `role` to tokens whose claim `key` matches `value_expression`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct M2mMapping {
    pub key: String,
    pub value_expression: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMachineToMachineConfig {
    pub id: String,
    pub config_type: M2mConfigType,
    pub issuer: String,
    pub token_expiration_duration: String,
    pub mappings: Vec<M2mMapping>,
    pub traits: Traits,
}

impl Identify for AuthMachineToMachineConfig {
    const KIND: ResourceKind = ResourceKind::AuthMachineToMachineConfig;

    fn identity(&self) -> Identity {
        Identity::new(&self.id, &self.issuer)
    }

    fn traits(&self) -> &Traits {
        &self.traits
    }

    fn traits_mut(&mut self) -> &mut Traits {
        &mut self.traits
    }
}

// ============================================================================
// Closed set of declared objects
// ============================================================================

/// Any object the declarative engine manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "object")]
pub enum DeclaredObject {
    AccessScope(AccessScope),
    PermissionSet(PermissionSet),
    Role(Role),
    AuthProvider(AuthProvider),
    Group(Group),
    Notifier(Notifier),
    AuthMachineToMachineConfig(AuthMachineToMachineConfig),
}

impl DeclaredObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            DeclaredObject::AccessScope(_) => ResourceKind::AccessScope,
            DeclaredObject::PermissionSet(_) => ResourceKind::PermissionSet,
            DeclaredObject::Role(_) => ResourceKind::Role,
            DeclaredObject::AuthProvider(_) => ResourceKind::AuthProvider,
            DeclaredObject::Group(_) => ResourceKind::Group,
            DeclaredObject::Notifier(_) => ResourceKind::Notifier,
            DeclaredObject::AuthMachineToMachineConfig(_) => {
                ResourceKind::AuthMachineToMachineConfig
            }
        }
    }

    pub fn identity(&self) -> Identity {
        match self {
            DeclaredObject::AccessScope(o) => o.identity(),
            DeclaredObject::PermissionSet(o) => o.identity(),
            DeclaredObject::Role(o) => o.identity(),
            DeclaredObject::AuthProvider(o) => o.identity(),
            DeclaredObject::Group(o) => o.identity(),
            DeclaredObject::Notifier(o) => o.identity(),
            DeclaredObject::AuthMachineToMachineConfig(o) => o.identity(),
        }
    }

    pub fn health_id(&self) -> String {
        match self {
            DeclaredObject::AccessScope(o) => o.health_id(),
            DeclaredObject::PermissionSet(o) => o.health_id(),
            DeclaredObject::Role(o) => o.health_id(),
            DeclaredObject::AuthProvider(o) => o.health_id(),
            DeclaredObject::Group(o) => o.health_id(),
            DeclaredObject::Notifier(o) => o.health_id(),
            DeclaredObject::AuthMachineToMachineConfig(o) => o.health_id(),
        }
    }

    pub fn traits(&self) -> &Traits {
        match self {
            DeclaredObject::AccessScope(o) => o.traits(),
            DeclaredObject::PermissionSet(o) => o.traits(),
            DeclaredObject::Role(o) => o.traits(),
            DeclaredObject::AuthProvider(o) => o.traits(),
            DeclaredObject::Group(o) => o.traits(),
            DeclaredObject::Notifier(o) => o.traits(),
            DeclaredObject::AuthMachineToMachineConfig(o) => o.traits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> Role {
        Role {
            name: name.to_string(),
            description: String::new(),
            permission_set_id: "ps".to_string(),
            access_scope_id: "as".to_string(),
            traits: Traits::declarative(),
        }
    }

    #[test]
    fn test_origin_ownership() {
        assert!(Origin::Declarative.is_declarative());
        assert!(Origin::DeclarativeOrphaned.is_declarative());
        assert!(!Origin::Imperative.is_declarative());
        assert!(Origin::Default.is_imperative());
        assert!(!Origin::DeclarativeOrphaned.is_imperative());
    }

    #[test]
    fn test_origin_serialization() {
        assert_eq!(
            serde_json::to_string(&Origin::DeclarativeOrphaned).unwrap(),
            "\"DECLARATIVE_ORPHANED\""
        );
        let mode: MutabilityMode = serde_json::from_str("\"ALLOW_MUTATE_FORCED\"").unwrap();
        assert_eq!(mode, MutabilityMode::AllowMutateForced);
    }

    #[test]
    fn test_identity_falls_back_to_id() {
        let identity = Identity::new("abc", "  ");
        assert_eq!(identity.name, "abc");
    }

    #[test]
    fn test_role_uses_name_as_id_and_derived_health_id() {
        let role = role("Head Master");
        let identity = role.identity();
        assert_eq!(identity.id, "Head Master");
        assert_eq!(identity.name, "Head Master");
        assert_ne!(role.health_id(), "Head Master");
        assert_eq!(role.health_id(), ids::role_health_id("Head Master"));
    }

    #[test]
    fn test_declared_object_dispatch() {
        let object = DeclaredObject::Role(role("Reader"));
        assert_eq!(object.kind(), ResourceKind::Role);
        assert_eq!(object.identity().id, "Reader");
        assert_eq!(object.traits().origin, Origin::Declarative);
    }

    #[test]
    fn test_default_group_name() {
        let group = Group {
            id: "g1".to_string(),
            auth_provider_id: "p1".to_string(),
            key: String::new(),
            value: String::new(),
            role_name: "Admin".to_string(),
            traits: Traits::declarative(),
        };
        assert!(group.is_default());
        assert_eq!(group.identity().name, "p1 -> Admin");
    }
}

//! Deterministic identifiers for declared objects.
//!
//! Each kind has its own UUIDv5 namespace so that the same name declared
//! for two kinds never collides, and so that re-declaring an object after
//! a restart yields the same store key.

use uuid::Uuid;

use super::resource::ResourceKind;

const ACCESS_SCOPE_NAMESPACE: &str = "access-scope.declarative.aclsync";
const PERMISSION_SET_NAMESPACE: &str = "permission-set.declarative.aclsync";
const ROLE_NAMESPACE: &str = "role.declarative.aclsync";
const AUTH_PROVIDER_NAMESPACE: &str = "auth-provider.declarative.aclsync";
const GROUP_NAMESPACE: &str = "group.declarative.aclsync";
const NOTIFIER_NAMESPACE: &str = "notifier.declarative.aclsync";
const M2M_NAMESPACE: &str = "m2m-config.declarative.aclsync";
const CONFIG_SOURCE_NAMESPACE: &str = "config-source.declarative.aclsync";
const PARSE_ERROR_NAMESPACE: &str = "parse-error.declarative.aclsync";
const UPDATER_NAMESPACE: &str = "updater.declarative.aclsync";

fn namespace(label: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, label.as_bytes())
}

fn derive(label: &str, name: &str) -> String {
    Uuid::new_v5(&namespace(label), name.as_bytes()).to_string()
}

pub fn access_scope_id(name: &str) -> String {
    derive(ACCESS_SCOPE_NAMESPACE, name)
}

pub fn permission_set_id(name: &str) -> String {
    derive(PERMISSION_SET_NAMESPACE, name)
}

/// Roles are stored under their name; this id only keys their health record.
pub fn role_health_id(name: &str) -> String {
    derive(ROLE_NAMESPACE, name)
}

pub fn auth_provider_id(name: &str) -> String {
    derive(AUTH_PROVIDER_NAMESPACE, name)
}

/// Group ids cover every field that distinguishes one mapping from another.
pub fn group_id(auth_provider_id: &str, key: &str, value: &str, role: &str) -> String {
    let seed = format!("{auth_provider_id}\u{0}{key}\u{0}{value}\u{0}{role}");
    derive(GROUP_NAMESPACE, &seed)
}

pub fn notifier_id(name: &str) -> String {
    derive(NOTIFIER_NAMESPACE, name)
}

pub fn m2m_config_id(issuer: &str) -> String {
    derive(M2M_NAMESPACE, issuer)
}

/// Health key of a watched file.
pub fn config_source_id(file_name: &str) -> String {
    derive(CONFIG_SOURCE_NAMESPACE, file_name)
}

/// Health key of a declaration that failed to parse, by file and position.
pub fn parse_error_id(file_name: &str, position: usize) -> String {
    derive(PARSE_ERROR_NAMESPACE, &format!("{file_name}#{position}"))
}

/// Health key of the engine's own handling of a kind.
pub fn updater_health_id(kind: ResourceKind) -> String {
    derive(UPDATER_NAMESPACE, &kind.to_string())
}

//! Processing order of resource kinds.
//!
//! Kinds are upserted so that every referenced object exists before the
//! objects pointing at it, and deleted in the reverse order.

use super::resource::ResourceKind;

/// Upsert order. Each kind appears after every kind it depends on.
pub const PROCESSING_ORDER: [ResourceKind; 7] = [
    ResourceKind::AccessScope,
    ResourceKind::PermissionSet,
    ResourceKind::Role,
    ResourceKind::AuthProvider,
    ResourceKind::Group,
    ResourceKind::Notifier,
    ResourceKind::AuthMachineToMachineConfig,
];

/// Deletion order: the reverse of [`PROCESSING_ORDER`].
pub fn deletion_order() -> impl Iterator<Item = ResourceKind> {
    PROCESSING_ORDER.into_iter().rev()
}

/// Kinds that must exist before an object of `kind` can be stored.
pub fn dependencies(kind: ResourceKind) -> &'static [ResourceKind] {
    match kind {
        ResourceKind::Role => &[ResourceKind::PermissionSet, ResourceKind::AccessScope],
        ResourceKind::Group => &[ResourceKind::AuthProvider, ResourceKind::Role],
        ResourceKind::AuthMachineToMachineConfig => &[ResourceKind::Role],
        ResourceKind::AccessScope
        | ResourceKind::PermissionSet
        | ResourceKind::AuthProvider
        | ResourceKind::Notifier => &[],
    }
}

/// Position of `kind` in [`PROCESSING_ORDER`].
pub fn position(kind: ResourceKind) -> usize {
    PROCESSING_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(PROCESSING_ORDER.len())
}

//! Reconciliation properties: debounce, deletion, idempotence, orphaning
//! and dependency ordering.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;

use aclsync::declarative::health;
use aclsync::declarative::ids;
use aclsync::declarative::updater::memory_updaters;
use aclsync::declarative::watcher::{
    poll_and_dispatch, ChangeDetector, DirectoryWatcher, FileBatch, WatchHandler, WatchLoop,
};
use aclsync::declarative::{DeclarativeError, HealthRecord, ReconciliationManager};
use aclsync::model::{AuthProvider, Group, Notifier, PermissionSet, Role, Traits};
use aclsync::store::memory::StoreOp;
use aclsync::store::{GroupStore, ObjectStore};
use aclsync::{AccessContext, HealthTracker, Origin, ResourceKind, SqliteHealthTracker, StoreError};

fn rbac() -> String {
    [ACCESS_SCOPE_YAML, PERMISSION_SET_YAML, ROLE_YAML].join("---\n")
}

#[derive(Default)]
struct CountingHandler {
    batches: AtomicUsize,
}

#[async_trait]
impl WatchHandler for CountingHandler {
    async fn on_stable_batch(&self, _batch: FileBatch) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }

    fn on_watch_error(&self, _error: &DeclarativeError) {}
}

#[tokio::test]
async fn test_unchanged_directory_does_not_invoke_manager() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());

    let handler = Arc::new(CountingHandler::default());
    let watch_loop = WatchLoop::new(
        Arc::new(DirectoryWatcher::new(&harness.config_dir, ChangeDetector::new())),
        handler.clone(),
        Duration::from_secs(60),
    );

    assert!(watch_loop.run_once().await);
    for _ in 0..3 {
        assert!(!watch_loop.run_once().await);
    }
    assert_eq!(handler.batches.load(Ordering::SeqCst), 1);

    // Rewriting identical bytes is not a change.
    harness.write("rbac.yaml", &rbac());
    assert!(!watch_loop.run_once().await);

    harness.write("notifier.yaml", NOTIFIER_YAML);
    assert!(watch_loop.run_once().await);
    assert_eq!(handler.batches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reapplying_same_declarations_writes_nothing() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.write("auth.yaml", AUTH_PROVIDER_YAML);
    harness.write("m2m.yaml", M2M_YAML);
    harness.pass().await;

    let writes = harness.store.write_count();
    let roles = harness.store.objects::<Role>();
    let groups = harness.store.objects::<Group>();

    assert!(harness.cycle().await.unwrap().is_none());
    let report = harness
        .manager
        .reconcile(harness.watcher.read_batch().unwrap().0)
        .await
        .unwrap();
    assert!(report.is_clean());

    assert_eq!(harness.store.write_count(), writes);
    assert_eq!(harness.store.objects::<Role>(), roles);
    assert_eq!(harness.store.objects::<Group>(), groups);
}

#[tokio::test]
async fn test_dropped_declarations_are_deleted() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.write("notifier.yaml", NOTIFIER_YAML);
    harness.pass().await;

    harness.remove("notifier.yaml");
    let report = harness.pass().await;
    assert_eq!(report.deleted, 1);
    assert!(harness.store.objects::<Notifier>().is_empty());
    assert_eq!(harness.store.objects::<Role>().len(), 1);
    assert!(harness.health_of(&ids::notifier_id("Howler")).is_none());
    assert!(harness
        .health_of(&ids::config_source_id("notifier.yaml"))
        .is_none());
}

#[tokio::test]
async fn test_upserts_follow_dependency_order() {
    let harness = TestHarness::new();
    // Role declared in a file sorted before its dependencies.
    harness.write("a-role.yaml", ROLE_YAML);
    harness.write("b-permission-set.yaml", PERMISSION_SET_YAML);
    harness.write("c-access-scope.yaml", ACCESS_SCOPE_YAML);

    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);

    let upsert_of = |kind: ResourceKind| {
        harness
            .journal_position(|e| e.op == StoreOp::Upsert && e.kind == kind)
            .unwrap_or_else(|| panic!("no {kind} upsert"))
    };
    assert!(upsert_of(ResourceKind::PermissionSet) < upsert_of(ResourceKind::Role));
    assert!(upsert_of(ResourceKind::AccessScope) < upsert_of(ResourceKind::Role));
}

#[tokio::test]
async fn test_removals_follow_reverse_dependency_order() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.pass().await;

    harness.remove("rbac.yaml");
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);

    let removal_of = |kind: ResourceKind| {
        harness
            .journal_position(|e| e.op == StoreOp::Remove && e.kind == kind)
            .unwrap_or_else(|| panic!("no {kind} removal"))
    };
    assert!(removal_of(ResourceKind::Role) < removal_of(ResourceKind::PermissionSet));
    assert!(removal_of(ResourceKind::Role) < removal_of(ResourceKind::AccessScope));
}

/// Adds an imperative provider and group that keep "Head Master" referenced.
async fn pin_role_with_imperative_group(harness: &TestHarness) -> Group {
    let ctx = AccessContext::imperative();
    let provider = AuthProvider {
        id: "imperative-provider".to_string(),
        name: "Floo Network".to_string(),
        provider_type: "oidc".to_string(),
        ui_endpoint: "floo.example.com".to_string(),
        extra_ui_endpoints: Vec::new(),
        enabled: true,
        config: Default::default(),
        required_attributes: Vec::new(),
        claim_mappings: Default::default(),
        traits: Traits::imperative(),
    };
    ObjectStore::<AuthProvider>::upsert(harness.store.as_ref(), &ctx, &provider)
        .await
        .unwrap();
    let group = Group {
        id: "imperative-group".to_string(),
        auth_provider_id: provider.id.clone(),
        key: "email".to_string(),
        value: "minerva@hogwarts.example.com".to_string(),
        role_name: "Head Master".to_string(),
        traits: Traits::imperative(),
    };
    ObjectStore::<Group>::upsert(harness.store.as_ref(), &ctx, &group)
        .await
        .unwrap();
    group
}

#[tokio::test]
async fn test_referenced_objects_are_orphaned_then_removed() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.pass().await;
    let group = pin_role_with_imperative_group(&harness).await;

    harness.remove("rbac.yaml");
    let report = harness.pass().await;

    // The role is pinned by the group; the scope and permission set by the role.
    assert_eq!(report.orphaned, 3);
    assert_eq!(report.deleted, 0);
    let role = harness.store.objects::<Role>().pop().expect("role kept");
    assert_eq!(role.traits.origin, Origin::DeclarativeOrphaned);
    let role_health = harness
        .health_of(&ids::role_health_id("Head Master"))
        .expect("role health");
    assert!(!role_health.is_healthy());

    ObjectStore::<Group>::remove(harness.store.as_ref(), &AccessContext::imperative(), &group.id)
        .await
        .unwrap();

    // Nothing changed on disk, so no pass runs until the next change.
    assert!(harness.cycle().await.unwrap().is_none());
    assert_eq!(harness.store.objects::<Role>().len(), 1);

    harness.write("notifier.yaml", NOTIFIER_YAML);
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);
    assert_eq!(report.deleted, 3);
    assert!(harness.store.objects::<Role>().is_empty());
    assert!(harness.store.objects::<PermissionSet>().is_empty());
    assert!(harness.health_of(&ids::role_health_id("Head Master")).is_none());
}

/// Health tracker that counts writes.
struct CountingHealth {
    inner: SqliteHealthTracker,
    writes: AtomicUsize,
}

impl CountingHealth {
    fn new() -> Self {
        Self {
            inner: SqliteHealthTracker::in_memory().expect("Failed to open health db"),
            writes: AtomicUsize::new(0),
        }
    }
}

impl HealthTracker for CountingHealth {
    fn get(&self, ctx: &AccessContext, id: &str) -> health::Result<Option<HealthRecord>> {
        self.inner.get(ctx, id)
    }

    fn get_all(&self, ctx: &AccessContext) -> health::Result<Vec<HealthRecord>> {
        self.inner.get_all(ctx)
    }

    fn upsert(&self, ctx: &AccessContext, record: &HealthRecord) -> health::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(ctx, record)
    }

    fn delete(&self, ctx: &AccessContext, id: &str) -> health::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(ctx, id)
    }
}

#[tokio::test]
async fn test_lasting_orphan_is_not_reconciled_on_unchanged_polls() {
    let harness = TestHarness::new();
    let health = Arc::new(CountingHealth::new());
    let manager = ReconciliationManager::new(
        memory_updaters(&harness.store),
        health.clone(),
        Duration::from_secs(5),
    );
    let watcher = DirectoryWatcher::new(&harness.config_dir, ChangeDetector::new());

    harness.write("rbac.yaml", &rbac());
    assert!(poll_and_dispatch(&watcher, &manager).await);
    pin_role_with_imperative_group(&harness).await;
    harness.remove("rbac.yaml");
    assert!(poll_and_dispatch(&watcher, &manager).await);
    let report = manager.last_report().await.expect("pass ran");
    assert_eq!(report.orphaned, 3);

    let health_writes = health.writes.load(Ordering::SeqCst);
    let journal = harness.store.journal().len();
    for _ in 0..3 {
        assert!(!poll_and_dispatch(&watcher, &manager).await);
    }
    assert_eq!(health.writes.load(Ordering::SeqCst), health_writes);
    assert_eq!(harness.store.journal().len(), journal);
}

#[tokio::test]
async fn test_orphan_is_readopted_when_declared_again() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.pass().await;

    harness.remove("rbac.yaml");
    harness.write("role.yaml", ROLE_YAML);
    harness.write("scope.yaml", ACCESS_SCOPE_YAML);
    let report = harness.pass().await;
    assert_eq!(report.orphaned, 1);
    let orphan = &harness.store.objects::<PermissionSet>()[0];
    assert_eq!(orphan.traits.origin, Origin::DeclarativeOrphaned);

    harness.write("permission-set.yaml", PERMISSION_SET_YAML);
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);
    let readopted = &harness.store.objects::<PermissionSet>()[0];
    assert_eq!(readopted.traits.origin, Origin::Declarative);
    assert_eq!(readopted.id, ids::permission_set_id("Everything"));
}

#[tokio::test]
async fn test_imperative_object_is_not_overwritten() {
    let harness = TestHarness::new();
    let ctx = AccessContext::imperative();
    let imperative = PermissionSet {
        id: ids::permission_set_id("Everything"),
        name: "Everything".to_string(),
        description: "created by hand".to_string(),
        resource_to_access: Default::default(),
        traits: Traits::imperative(),
    };
    ObjectStore::<PermissionSet>::upsert(harness.store.as_ref(), &ctx, &imperative)
        .await
        .unwrap();

    harness.write("permission-set.yaml", PERMISSION_SET_YAML);
    let report = harness.pass().await;

    assert_eq!(report.upsert_failures.len(), 1);
    assert!(report.upsert_failures[0].error.contains("Not authorized"));
    assert_eq!(harness.store.objects::<PermissionSet>(), vec![imperative]);
    let health = harness
        .health_of(&ids::permission_set_id("Everything"))
        .expect("health");
    assert!(!health.is_healthy());

    // The imperative object is never swept either.
    harness.remove("permission-set.yaml");
    let report = harness.pass().await;
    assert_eq!(report.deleted, 0);
    assert_eq!(harness.store.objects::<PermissionSet>().len(), 1);
}

#[tokio::test]
async fn test_m2m_config_requires_roles() {
    let harness = TestHarness::new();
    harness.write("m2m.yaml", M2M_YAML);

    let report = harness.pass().await;
    assert_eq!(report.upsert_failures.len(), 1);
    assert_eq!(report.upsert_failures[0].kind, ResourceKind::AuthMachineToMachineConfig);
    assert!(report.upsert_failures[0].error.contains("Head Master"));

    harness.write("rbac.yaml", &rbac());
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);
}

#[tokio::test]
async fn test_transient_removal_failure_keeps_object() {
    let harness = TestHarness::new();
    harness.write("notifier.yaml", NOTIFIER_YAML);
    harness.pass().await;

    let id = ids::notifier_id("Howler");
    harness.store.inject_failure(
        ResourceKind::Notifier,
        &id,
        StoreError::Unavailable("integration backend down".to_string()),
    );
    harness.remove("notifier.yaml");
    let report = harness.pass().await;

    assert_eq!(report.delete_failures.len(), 1);
    assert_eq!(report.delete_failures[0].id.as_deref(), Some(id.as_str()));
    assert_eq!(report.orphaned, 0);
    assert_eq!(harness.store.objects::<Notifier>().len(), 1);
    assert!(!harness.health_of(&id).expect("health").is_healthy());

    harness.store.clear_failures();
    harness.write("scope.yaml", ACCESS_SCOPE_YAML);
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);
    assert_eq!(report.deleted, 1);
    assert!(harness.store.objects::<Notifier>().is_empty());
    assert!(harness.health_of(&id).is_none());
}

#[tokio::test]
async fn test_provider_removal_cascades_to_imperative_groups() {
    let harness = TestHarness::new();
    harness.write("rbac.yaml", &rbac());
    harness.write("auth.yaml", AUTH_PROVIDER_YAML);
    harness.pass().await;

    let provider_id = ids::auth_provider_id("Owlery");
    let extra = Group {
        id: "hand-made".to_string(),
        auth_provider_id: provider_id.clone(),
        key: "email".to_string(),
        value: "hagrid@hogwarts.example.com".to_string(),
        role_name: "Head Master".to_string(),
        traits: Traits::imperative(),
    };
    ObjectStore::<Group>::upsert(harness.store.as_ref(), &AccessContext::imperative(), &extra)
        .await
        .unwrap();

    harness.remove("auth.yaml");
    let report = harness.pass().await;
    assert!(report.is_clean(), "unexpected failures: {:?}", report);
    assert!(harness.store.objects::<AuthProvider>().is_empty());
    assert!(harness.store.objects::<Group>().is_empty());
    assert!(!harness.store.registered_providers().contains(&provider_id));

    // Direct cascades need force.
    let err = harness
        .store
        .remove_all_for_provider(&AccessContext::declarative(), &provider_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotAuthorized(_)));
}

//! Test harness for isolated reconciliation runs.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use aclsync::declarative::updater::memory_updaters;
use aclsync::declarative::watcher::{ChangeDetector, DirectoryWatcher};
use aclsync::declarative::{DeclarativeError, HealthRecord, PassReport, ReconciliationManager};
use aclsync::store::memory::StoreEvent;
use aclsync::{AccessContext, HealthTracker, MemoryStore, SqliteHealthTracker};

/// A watched directory reconciled into an in-memory store.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory the watcher polls.
    pub config_dir: PathBuf,
    pub store: Arc<MemoryStore>,
    pub health: Arc<SqliteHealthTracker>,
    pub manager: Arc<ReconciliationManager>,
    pub watcher: DirectoryWatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config_dir = temp_dir.path().join("declarative");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        let store = Arc::new(MemoryStore::new());
        let health = Arc::new(SqliteHealthTracker::in_memory().expect("Failed to open health db"));
        let manager = Arc::new(ReconciliationManager::new(
            memory_updaters(&store),
            health.clone(),
            Duration::from_secs(5),
        ));
        let watcher = DirectoryWatcher::new(&config_dir, ChangeDetector::new());

        Self {
            temp_dir,
            config_dir,
            store,
            health,
            manager,
            watcher,
        }
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.config_dir.join(name), content).expect("Failed to write declaration");
    }

    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.config_dir.join(name)).expect("Failed to remove declaration");
    }

    /// Polls once and runs a pass if the directory changed.
    ///
    /// Returns `Ok(None)` when the poll saw no change.
    pub async fn cycle(&self) -> Result<Option<PassReport>, DeclarativeError> {
        let outcome = self.watcher.poll()?;
        if !outcome.changed {
            return Ok(None);
        }
        self.manager.reconcile(outcome.batch).await.map(Some)
    }

    /// Like [`Self::cycle`] but panics unless a pass ran.
    pub async fn pass(&self) -> PassReport {
        self.cycle()
            .await
            .expect("pass failed")
            .expect("directory did not change")
    }

    pub fn health_of(&self, id: &str) -> Option<HealthRecord> {
        self.health
            .get(&AccessContext::read_only(), id)
            .expect("Failed to read health")
    }

    pub fn health_records(&self) -> Vec<HealthRecord> {
        self.health
            .get_all(&AccessContext::read_only())
            .expect("Failed to read health")
    }

    /// Position of the first journal event matching `pred`.
    pub fn journal_position(&self, pred: impl Fn(&StoreEvent) -> bool) -> Option<usize> {
        self.store.journal().iter().position(pred)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

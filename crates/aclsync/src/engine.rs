//! Engine wiring.
//!
//! Everything the engine talks to is handed in through [`EngineBuilder`];
//! there is no global state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tokio::sync::broadcast;

use crate::config::{validate_settings, EngineSettings};
use crate::declarative::health::{HealthError, HealthRecord, HealthTracker, SqliteHealthTracker};
use crate::declarative::manager::{ManagerState, PassReport, ReconciliationManager};
use crate::declarative::updater::{memory_updaters, ResourceUpdater, UpdaterSet};
use crate::declarative::watcher::{ChangeDetector, DirectoryWatcher, FileHashRecord, WatchLoop};
use crate::error::{AclsyncError, Result};
use crate::store::{AccessContext, MemoryStore};

pub struct EngineBuilder {
    settings: EngineSettings,
    updaters: UpdaterSet,
    health: Option<Arc<dyn HealthTracker>>,
}

impl EngineBuilder {
    fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            updaters: UpdaterSet::new(),
            health: None,
        }
    }

    /// Adds or replaces the updater for one kind.
    pub fn with_updater(mut self, updater: Arc<dyn ResourceUpdater>) -> Self {
        self.updaters.insert(updater);
        self
    }

    pub fn with_updaters(mut self, updaters: UpdaterSet) -> Self {
        self.updaters = updaters;
        self
    }

    /// Wires every kind to one in-memory store.
    pub fn with_memory_store(self, store: &Arc<MemoryStore>) -> Self {
        self.with_updaters(memory_updaters(store))
    }

    /// Uses `tracker` instead of the SQLite database from the settings.
    pub fn with_health_tracker(mut self, tracker: Arc<dyn HealthTracker>) -> Self {
        self.health = Some(tracker);
        self
    }

    pub fn build(self) -> Result<Engine> {
        validate_settings(&self.settings)?;
        if let Some(kind) = self.updaters.missing_kinds().into_iter().next() {
            return Err(AclsyncError::MissingCollaborator(kind));
        }

        let health = match self.health {
            Some(tracker) => tracker,
            None => match self.settings.resolved_database_path() {
                Some(path) => Arc::new(SqliteHealthTracker::open(&path)?) as Arc<dyn HealthTracker>,
                None => {
                    log::warn!("No data directory available, keeping health in memory");
                    Arc::new(SqliteHealthTracker::in_memory()?)
                }
            },
        };

        let manager = Arc::new(ReconciliationManager::new(
            self.updaters,
            health,
            self.settings.call_timeout(),
        ));
        let watcher = Arc::new(DirectoryWatcher::new(
            self.settings.config_dir.clone(),
            ChangeDetector::new(),
        ));
        let watch_loop = WatchLoop::new(
            Arc::clone(&watcher),
            manager.clone(),
            self.settings.poll_interval(),
        );
        let (trigger_tx, _) = broadcast::channel(16);

        Ok(Engine {
            settings: self.settings,
            manager,
            watcher,
            watch_loop,
            trigger_tx,
            handle: Mutex::new(None),
        })
    }
}

/// A wired reconciliation engine for one config directory.
pub struct Engine {
    settings: EngineSettings,
    manager: Arc<ReconciliationManager>,
    watcher: Arc<DirectoryWatcher>,
    watch_loop: WatchLoop,
    trigger_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(settings: EngineSettings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<ReconciliationManager> {
        &self.manager
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts the background watch loop.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.lock_handle();
        if handle.is_some() {
            return Err(AclsyncError::AlreadyRunning);
        }
        log::info!(
            "Watching '{}' for declarative config every {}s",
            self.settings.config_dir.display(),
            self.settings.poll_interval_secs
        );
        *handle = Some(self.watch_loop.start(self.trigger_tx.subscribe()));
        Ok(())
    }

    /// Stops the watch loop and waits for its thread. A pass in flight
    /// completes first.
    pub fn stop(&self) {
        let Some(handle) = self.lock_handle().take() else {
            return;
        };
        self.watch_loop.stop();
        let _ = self.trigger_tx.send(());
        if handle.join().is_err() {
            log::error!("Declarative config watch thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_handle().is_some()
    }

    /// Asks the running loop to poll now.
    pub fn trigger(&self) {
        if self.trigger_tx.send(()).is_err() {
            log::debug!("Poll trigger dropped, watch loop is not running");
        }
    }

    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    pub fn health(&self) -> std::result::Result<Vec<HealthRecord>, HealthError> {
        self.manager.health().get_all(&AccessContext::read_only())
    }

    pub fn file_digests(&self) -> Vec<FileHashRecord> {
        self.watcher.detector().snapshot()
    }

    /// Reads the directory and runs a pass whether or not anything changed.
    pub async fn reconcile_now(&self) -> Result<PassReport> {
        let (batch, digests) = self.watcher.read_batch()?;
        self.watcher.detector().observe(&digests);
        Ok(self.manager.reconcile(batch).await?)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("manager", &self.manager)
            .field("running", &self.is_running())
            .finish()
    }
}

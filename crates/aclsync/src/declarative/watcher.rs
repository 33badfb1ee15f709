//! Config directory watcher and change detector.
//!
//! The watched directory is polled: every top-level regular file is read and
//! digested, and the digests are compared against the previous poll. Only a
//! poll that read every file successfully and saw a difference is forwarded
//! as a stable batch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use walkdir::WalkDir;

use super::error::{DeclarativeError, Result};
use super::parser::validate_yaml;

/// Digest of one watched file as last seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHashRecord {
    pub file_name: String,
    pub content_digest: String,
}

/// Contents of the watched directory at one stable poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBatch {
    /// File name to raw bytes, for files that parsed as YAML.
    pub files: BTreeMap<String, Vec<u8>>,
    /// File name to YAML error, for files excluded from the batch.
    pub invalid: BTreeMap<String, String>,
}

impl FileBatch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.invalid.is_empty()
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Change detector
// ============================================================================

/// Remembers the digest of every file seen at the last stable poll.
///
/// Cloning shares the cache.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    cache: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Compares a complete listing with the cache and replaces the cache.
    ///
    /// Returns whether any file was added, changed or removed.
    pub fn observe(&self, digests: &BTreeMap<String, String>) -> bool {
        let mut cache = self.lock();
        if *cache == *digests {
            return false;
        }
        for (name, digest) in digests {
            match cache.get(name) {
                None => log::debug!("New declaration file '{}'", name),
                Some(previous) if previous != digest => {
                    log::debug!("Declaration file '{}' changed", name)
                }
                Some(_) => {}
            }
        }
        for name in cache.keys().filter(|name| !digests.contains_key(*name)) {
            log::debug!("Declaration file '{}' removed", name);
        }
        *cache = digests.clone();
        true
    }

    /// Copy of the cache for diagnostics.
    pub fn snapshot(&self) -> Vec<FileHashRecord> {
        self.lock()
            .iter()
            .map(|(name, digest)| FileHashRecord {
                file_name: name.clone(),
                content_digest: digest.clone(),
            })
            .collect()
    }

    /// Forgets every digest so the next poll is treated as a change.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

// ============================================================================
// Directory watcher
// ============================================================================

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub batch: FileBatch,
    pub changed: bool,
}

/// Polls one directory for declaration files.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    detector: ChangeDetector,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, detector: ChangeDetector) -> Self {
        Self {
            dir: dir.into(),
            detector,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Reads the directory without touching the change detector.
    ///
    /// Returns the batch and the digest of every readable file, including
    /// files excluded for invalid YAML.
    pub fn read_batch(&self) -> Result<(FileBatch, BTreeMap<String, String>)> {
        let mut batch = FileBatch::default();
        let mut digests = BTreeMap::new();

        let entries = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in entries {
            let entry = entry.map_err(|e| DeclarativeError::ReadDirectory {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().is_dir() {
                log::debug!("Skipping sub-directory '{}'", name);
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let bytes = std::fs::read(entry.path()).map_err(|e| DeclarativeError::ReadFile {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            digests.insert(name.clone(), content_digest(&bytes));

            match validate_yaml(&bytes) {
                Ok(()) => {
                    batch.files.insert(name, bytes);
                }
                Err(message) => {
                    log::warn!("Ignoring '{}': invalid YAML: {}", name, message);
                    batch.invalid.insert(name, message);
                }
            }
        }

        Ok((batch, digests))
    }

    /// Reads the directory and updates the change detector.
    ///
    /// A read error leaves the detector untouched.
    pub fn poll(&self) -> Result<PollOutcome> {
        let (batch, digests) = self.read_batch()?;
        let changed = self.detector.observe(&digests);
        Ok(PollOutcome { batch, changed })
    }
}

// ============================================================================
// Watch loop
// ============================================================================

/// Receives the results of polls.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    /// Called with every stable batch that differs from the previous one.
    async fn on_stable_batch(&self, batch: FileBatch);

    /// Called when a poll could not read the directory consistently.
    fn on_watch_error(&self, error: &DeclarativeError);
}

/// Polls once and dispatches the outcome. Returns whether a batch was
/// forwarded.
pub async fn poll_and_dispatch(watcher: &DirectoryWatcher, handler: &dyn WatchHandler) -> bool {
    match watcher.poll() {
        Ok(PollOutcome {
            batch,
            changed: true,
        }) => {
            handler.on_stable_batch(batch).await;
            true
        }
        Ok(_) => false,
        Err(e) => {
            log::warn!("Unstable poll of '{}': {}", watcher.dir().display(), e);
            handler.on_watch_error(&e);
            false
        }
    }
}

/// Periodic polling on a dedicated thread.
pub struct WatchLoop {
    watcher: Arc<DirectoryWatcher>,
    handler: Arc<dyn WatchHandler>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WatchLoop {
    pub fn new(
        watcher: Arc<DirectoryWatcher>,
        handler: Arc<dyn WatchHandler>,
        interval: Duration,
    ) -> Self {
        Self {
            watcher,
            handler,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Polls once on the caller's runtime.
    pub async fn run_once(&self) -> bool {
        poll_and_dispatch(&self.watcher, self.handler.as_ref()).await
    }

    /// Starts polling in a background thread. The first poll runs
    /// immediately; a message on `trigger_rx` forces an extra poll.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        self.shutdown.store(false, Ordering::Release);
        let watcher = Arc::clone(&self.watcher);
        let handler = Arc::clone(&self.handler);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start watch runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual declarative config poll triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    poll_and_dispatch(&watcher, handler.as_ref()).await;
                }
                log::info!("Declarative config watcher stopped");
            });
        })
    }

    /// Halts future polls. A pass already running completes.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Reconciliation manager.
//!
//! Drives one pass per stable batch: parse, upsert every declared resource
//! in dependency order, sweep undeclared declarative objects in reverse
//! order, then record health. Passes are serialized.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, info_span, warn, Instrument};

use super::error::{DeclarativeError, Result};
use super::health::{forget_health, report_health, HealthRecord, HealthResourceKind, HealthTracker};
use super::ids;
use super::parser::{DeclarationParser, ParsedBatch};
use super::registry::{deletion_order, PROCESSING_ORDER};
use super::resource::ResourceKind;
use super::updater::{invariant_violation, DeletionOutcome, UpdaterSet};
use super::watcher::{FileBatch, WatchHandler};
use crate::store::AccessContext;

/// Phase of the manager, observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    Idle,
    Parsing,
    UpsertPass,
    DeletePass,
    Reporting,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Idle => "idle",
            ManagerState::Parsing => "parsing",
            ManagerState::UpsertPass => "upsert pass",
            ManagerState::DeletePass => "delete pass",
            ManagerState::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// One failed upsert or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassFailure {
    pub kind: ResourceKind,
    /// Absent when the kind's objects could not be listed.
    pub id: Option<String>,
    pub name: Option<String>,
    pub error: String,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub upserted: usize,
    pub upsert_failures: Vec<PassFailure>,
    pub deleted: usize,
    /// Removals blocked by a reference. Also counted in `delete_failures`.
    pub orphaned: usize,
    pub delete_failures: Vec<PassFailure>,
    pub parse_errors: usize,
    pub invalid_files: usize,
    /// Set when an invariant violation stopped the pass early.
    pub halted: Option<String>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.upsert_failures.is_empty()
            && self.delete_failures.is_empty()
            && self.parse_errors == 0
            && self.invalid_files == 0
            && self.halted.is_none()
    }
}

/// Health ids written by the previous pass that may go stale.
#[derive(Debug, Default)]
struct PassMemory {
    sources: BTreeSet<String>,
    parse_errors: BTreeSet<String>,
    last_report: Option<PassReport>,
}

pub struct ReconciliationManager {
    parser: DeclarationParser,
    updaters: UpdaterSet,
    health: Arc<dyn HealthTracker>,
    call_timeout: Duration,
    state: Mutex<ManagerState>,
    pass: AsyncMutex<PassMemory>,
}

impl ReconciliationManager {
    pub fn new(updaters: UpdaterSet, health: Arc<dyn HealthTracker>, call_timeout: Duration) -> Self {
        Self {
            parser: DeclarationParser::new(),
            updaters,
            health,
            call_timeout,
            state: Mutex::new(ManagerState::Idle),
            pass: AsyncMutex::new(PassMemory::default()),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.lock_state()
    }

    pub fn health(&self) -> &Arc<dyn HealthTracker> {
        &self.health
    }

    /// Report of the most recent completed pass.
    pub async fn last_report(&self) -> Option<PassReport> {
        self.pass.lock().await.last_report.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ManagerState) {
        *self.lock_state() = state;
    }

    /// Context for one collaborator call.
    fn call_ctx(&self) -> AccessContext {
        AccessContext::declarative().with_timeout(self.call_timeout)
    }

    /// Runs one full pass over `batch`.
    ///
    /// Fails only when the batch as a whole cannot be parsed; nothing is
    /// written in that case.
    pub async fn reconcile(&self, batch: FileBatch) -> Result<PassReport> {
        let span = info_span!(
            "reconcile",
            files = batch.files.len(),
            invalid = batch.invalid.len()
        );
        async move {
            let mut memory = self.pass.lock().await;
            let result = self.run_pass(&mut memory, &batch).await;
            self.set_state(ManagerState::Idle);
            result
        }
        .instrument(span)
        .await
    }

    async fn run_pass(&self, memory: &mut PassMemory, batch: &FileBatch) -> Result<PassReport> {
        self.set_state(ManagerState::Parsing);
        let parsed = match self.parser.parse(batch) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Declarative config batch rejected: {}", e);
                return Err(e);
            }
        };

        let mut report = PassReport::default();
        let health_ctx = AccessContext::declarative();
        let parse_error_ids = self.record_parse_errors(&parsed, &health_ctx, &mut report);

        self.set_state(ManagerState::UpsertPass);
        self.upsert_pass(&parsed, &health_ctx, &mut report).await;

        if report.halted.is_none() {
            self.set_state(ManagerState::DeletePass);
            self.delete_pass(&parsed, &health_ctx, &mut report).await;
        }

        self.set_state(ManagerState::Reporting);
        let sources = self.record_sources(batch, &parsed, &health_ctx, &mut report);
        for stale in memory.sources.difference(&sources) {
            forget_health(self.health.as_ref(), &health_ctx, &ids::config_source_id(stale));
        }
        for stale in memory.parse_errors.difference(&parse_error_ids) {
            forget_health(self.health.as_ref(), &health_ctx, stale);
        }
        memory.sources = sources;
        memory.parse_errors = parse_error_ids;

        log_report(&report);
        memory.last_report = Some(report.clone());
        Ok(report)
    }

    fn record_parse_errors(
        &self,
        parsed: &ParsedBatch,
        ctx: &AccessContext,
        report: &mut PassReport,
    ) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for error in &parsed.resource_errors {
            let kind = error
                .kind
                .map(HealthResourceKind::from)
                .unwrap_or(HealthResourceKind::ConfigSource);
            let id = error.health_id();
            report_health(
                self.health.as_ref(),
                ctx,
                HealthRecord::unhealthy(id.clone(), error.display_name(), kind, &error.message),
            );
            ids.insert(id);
            report.parse_errors += 1;
        }
        ids
    }

    async fn upsert_pass(&self, parsed: &ParsedBatch, health_ctx: &AccessContext, report: &mut PassReport) {
        for kind in PROCESSING_ORDER {
            let mut resources = parsed.resources_of(kind).peekable();
            if resources.peek().is_none() {
                continue;
            }
            let Some(updater) = self.updaters.get(kind) else {
                self.halt_on_missing_updater(kind, health_ctx, report);
                return;
            };

            for resource in resources {
                match updater.upsert(&self.call_ctx(), &resource.object).await {
                    Ok(()) => {
                        report.upserted += 1;
                        report_health(
                            self.health.as_ref(),
                            health_ctx,
                            HealthRecord::healthy(resource.health_id(), &resource.name, kind),
                        );
                    }
                    Err(e) => {
                        warn!("Failed to upsert {} '{}': {}", kind, resource.name, e);
                        report_health(
                            self.health.as_ref(),
                            health_ctx,
                            HealthRecord::unhealthy(resource.health_id(), &resource.name, kind, &e),
                        );
                        report.upsert_failures.push(PassFailure {
                            kind,
                            id: Some(resource.id.clone()),
                            name: Some(resource.name.clone()),
                            error: e.to_string(),
                        });
                        if e.is_invariant_violation() {
                            report.halted = Some(e.to_string());
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn delete_pass(&self, parsed: &ParsedBatch, health_ctx: &AccessContext, report: &mut PassReport) {
        for kind in deletion_order() {
            let Some(updater) = self.updaters.get(kind) else {
                self.halt_on_missing_updater(kind, health_ctx, report);
                return;
            };
            let declared = parsed.declared_ids(kind);
            let outcome = updater.delete_resources(&self.call_ctx(), &declared).await;
            self.record_deletions(outcome, health_ctx, report);
        }
    }

    fn halt_on_missing_updater(&self, kind: ResourceKind, ctx: &AccessContext, report: &mut PassReport) {
        let error = invariant_violation(format!("no updater registered for {kind}"));
        report_health(
            self.health.as_ref(),
            ctx,
            HealthRecord::unhealthy(ids::updater_health_id(kind), kind.to_string(), kind, &error),
        );
        report.halted = Some(error.to_string());
    }

    fn record_deletions(&self, outcome: DeletionOutcome, ctx: &AccessContext, report: &mut PassReport) {
        let kind = outcome.kind;
        if let Some(error) = &outcome.listing_error {
            report.delete_failures.push(PassFailure {
                kind,
                id: None,
                name: None,
                error: error.to_string(),
            });
        }
        for item in outcome.items {
            match item.error {
                None => {
                    report.deleted += 1;
                    forget_health(self.health.as_ref(), ctx, &item.health_id);
                }
                Some(error) => {
                    if item.orphaned {
                        report.orphaned += 1;
                    }
                    report_health(
                        self.health.as_ref(),
                        ctx,
                        HealthRecord::unhealthy(&item.health_id, &item.name, kind, &error),
                    );
                    report.delete_failures.push(PassFailure {
                        kind,
                        id: Some(item.id),
                        name: Some(item.name),
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    /// Writes one record per watched file and returns the file names seen.
    fn record_sources(
        &self,
        batch: &FileBatch,
        parsed: &ParsedBatch,
        ctx: &AccessContext,
        report: &mut PassReport,
    ) -> BTreeSet<String> {
        let mut sources = BTreeSet::new();
        for name in batch.files.keys() {
            let record = match parsed.file_errors.get(name) {
                Some(error) => HealthRecord::unhealthy(
                    ids::config_source_id(name),
                    name,
                    HealthResourceKind::ConfigSource,
                    error,
                ),
                None => HealthRecord::healthy(
                    ids::config_source_id(name),
                    name,
                    HealthResourceKind::ConfigSource,
                ),
            };
            report_health(self.health.as_ref(), ctx, record);
            sources.insert(name.clone());
        }
        for (name, error) in &batch.invalid {
            report.invalid_files += 1;
            report_health(
                self.health.as_ref(),
                ctx,
                HealthRecord::unhealthy(
                    ids::config_source_id(name),
                    name,
                    HealthResourceKind::ConfigSource,
                    format!("invalid YAML: {error}"),
                ),
            );
            sources.insert(name.clone());
        }
        sources
    }
}

fn log_report(report: &PassReport) {
    if let Some(reason) = &report.halted {
        warn!("Declarative config pass halted: {}", reason);
    }
    info!(
        upserted = report.upserted,
        upsert_failures = report.upsert_failures.len(),
        deleted = report.deleted,
        orphaned = report.orphaned,
        delete_failures = report.delete_failures.len(),
        parse_errors = report.parse_errors,
        invalid_files = report.invalid_files,
        "Declarative config pass complete"
    );
}

impl fmt::Debug for ReconciliationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationManager")
            .field("updaters", &self.updaters)
            .field("call_timeout", &self.call_timeout)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl WatchHandler for ReconciliationManager {
    async fn on_stable_batch(&self, batch: FileBatch) {
        // Failures are logged and reflected in health by the pass itself.
        let _ = self.reconcile(batch).await;
    }

    fn on_watch_error(&self, error: &DeclarativeError) {
        warn!("Declarative config directory is unstable, retrying next poll: {}", error);
    }
}

// ============================================================================
// Tests
// ============================================================================

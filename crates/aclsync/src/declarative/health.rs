//! Health records of declared resources and watched files.
//!
//! The engine writes one record per declared resource after every pass and
//! one per watched file. Failures to write health never fail a pass; they
//! are logged through [`report_health`] and [`forget_health`].

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resource::ResourceKind;
use crate::db::health_repo::{self, HealthRow};
use crate::db::{Database, DatabaseError};
use crate::store::AccessContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "HEALTHY" => Ok(HealthStatus::Healthy),
            "UNHEALTHY" => Ok(HealthStatus::Unhealthy),
            _ => Err(format!("Unknown health status: {}", s)),
        }
    }
}

/// What a health record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthResourceKind {
    Resource(ResourceKind),
    /// A watched declaration file.
    ConfigSource,
}

impl From<ResourceKind> for HealthResourceKind {
    fn from(kind: ResourceKind) -> Self {
        HealthResourceKind::Resource(kind)
    }
}

impl fmt::Display for HealthResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthResourceKind::Resource(kind) => write!(f, "{}", kind),
            HealthResourceKind::ConfigSource => write!(f, "ConfigSource"),
        }
    }
}

impl std::str::FromStr for HealthResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "ConfigSource" {
            return Ok(HealthResourceKind::ConfigSource);
        }
        s.parse::<ResourceKind>().map(HealthResourceKind::Resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    pub name: String,
    pub resource_kind: HealthResourceKind,
    pub status: HealthStatus,
    /// Empty when healthy.
    pub error_message: String,
    pub last_updated: DateTime<Utc>,
}

impl HealthRecord {
    pub fn healthy(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<HealthResourceKind>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_kind: kind.into(),
            status: HealthStatus::Healthy,
            error_message: String::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn unhealthy(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<HealthResourceKind>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error_message: error.to_string(),
            ..Self::healthy(id, name, kind)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    fn to_row(&self) -> HealthRow {
        HealthRow {
            id: self.id.clone(),
            name: self.name.clone(),
            resource_kind: self.resource_kind.to_string(),
            status: self.status.as_str().to_string(),
            error_message: self.error_message.clone(),
            last_updated: self.last_updated.to_rfc3339(),
        }
    }

    fn from_row(row: HealthRow) -> Result<Self> {
        let resource_kind = row
            .resource_kind
            .parse()
            .map_err(|_| DatabaseError::InvalidColumn {
                column: "resource_kind",
                value: row.resource_kind.clone(),
            })?;
        let status = row.status.parse().map_err(|_| DatabaseError::InvalidColumn {
            column: "status",
            value: row.status.clone(),
        })?;
        let last_updated = DateTime::parse_from_rfc3339(&row.last_updated)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| DatabaseError::InvalidColumn {
                column: "last_updated",
                value: row.last_updated.clone(),
            })?;
        Ok(Self {
            id: row.id,
            name: row.name,
            resource_kind,
            status,
            error_message: row.error_message,
            last_updated,
        })
    }
}

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Health storage failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),
}

pub type Result<T> = std::result::Result<T, HealthError>;

/// Durable store of health records.
pub trait HealthTracker: Send + Sync {
    fn get(&self, ctx: &AccessContext, id: &str) -> Result<Option<HealthRecord>>;

    fn get_all(&self, ctx: &AccessContext) -> Result<Vec<HealthRecord>>;

    fn upsert(&self, ctx: &AccessContext, record: &HealthRecord) -> Result<()>;

    /// Deleting an unknown id is not an error.
    fn delete(&self, ctx: &AccessContext, id: &str) -> Result<()>;
}

/// [`HealthTracker`] backed by the SQLite health database.
#[derive(Debug, Clone)]
pub struct SqliteHealthTracker {
    db: Database,
}

impl SqliteHealthTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn require_write(ctx: &AccessContext) -> Result<()> {
        ctx.require_write()
            .map_err(|e| HealthError::NotAuthorized(e.to_string()))
    }
}

impl HealthTracker for SqliteHealthTracker {
    fn get(&self, _ctx: &AccessContext, id: &str) -> Result<Option<HealthRecord>> {
        health_repo::find(&self.db, id)?
            .map(HealthRecord::from_row)
            .transpose()
    }

    fn get_all(&self, _ctx: &AccessContext) -> Result<Vec<HealthRecord>> {
        health_repo::list(&self.db)?
            .into_iter()
            .map(HealthRecord::from_row)
            .collect()
    }

    fn upsert(&self, ctx: &AccessContext, record: &HealthRecord) -> Result<()> {
        Self::require_write(ctx)?;
        health_repo::upsert(&self.db, &record.to_row())?;
        Ok(())
    }

    fn delete(&self, ctx: &AccessContext, id: &str) -> Result<()> {
        Self::require_write(ctx)?;
        health_repo::delete(&self.db, id)?;
        Ok(())
    }
}

/// Writes a health record, logging instead of propagating failures.
pub fn report_health(tracker: &dyn HealthTracker, ctx: &AccessContext, record: HealthRecord) {
    if !record.is_healthy() {
        log::debug!(
            "{} '{}' is unhealthy: {}",
            record.resource_kind,
            record.name,
            record.error_message
        );
    }
    if let Err(e) = tracker.upsert(ctx, &record) {
        log::warn!(
            "Failed to record health for {} '{}': {}",
            record.resource_kind,
            record.name,
            e
        );
    }
}

/// Removes a health record, logging instead of propagating failures.
pub fn forget_health(tracker: &dyn HealthTracker, ctx: &AccessContext, id: &str) {
    if let Err(e) = tracker.delete(ctx, id) {
        log::warn!("Failed to remove health record '{}': {}", id, e);
    }
}

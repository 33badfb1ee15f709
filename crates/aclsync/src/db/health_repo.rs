//! Health repository: CRUD operations for the `declarative_config_health` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw health row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRow {
    pub id: String,
    pub name: String,
    pub resource_kind: String,
    pub status: String,
    pub error_message: String,
    /// RFC 3339 timestamp.
    pub last_updated: String,
}

const COLUMNS: &str = "id, name, resource_kind, status, error_message, last_updated";

fn from_row(row: &Row<'_>) -> rusqlite::Result<HealthRow> {
    Ok(HealthRow {
        id: row.get(0)?,
        name: row.get(1)?,
        resource_kind: row.get(2)?,
        status: row.get(3)?,
        error_message: row.get(4)?,
        last_updated: row.get(5)?,
    })
}

/// Inserts or replaces a health row.
pub fn upsert(db: &Database, row: &HealthRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO declarative_config_health (id, name, resource_kind, status, error_message, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               name = ?2,
               resource_kind = ?3,
               status = ?4,
               error_message = ?5,
               last_updated = ?6",
            params![
                row.id,
                row.name,
                row.resource_kind,
                row.status,
                row.error_message,
                row.last_updated,
            ],
        )?;
        Ok(())
    })
}

/// Finds a health row by id.
pub fn find(db: &Database, id: &str) -> Result<Option<HealthRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM declarative_config_health WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists all health rows ordered by kind, then name.
pub fn list(db: &Database) -> Result<Vec<HealthRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM declarative_config_health ORDER BY resource_kind, name, id"
        ))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists health rows of one kind.
pub fn list_by_kind(db: &Database, resource_kind: &str) -> Result<Vec<HealthRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM declarative_config_health WHERE resource_kind = ?1 ORDER BY name, id"
        ))?;
        let rows = stmt
            .query_map(params![resource_kind], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a health row. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM declarative_config_health WHERE id = ?1",
            params![id],
        )?;
        Ok(affected > 0)
    })
}

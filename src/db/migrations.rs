//! Versioned SQL schema migrations.
//!
//! Each migration carries an `up` and a `down` script. Applied versions are
//! recorded in `schema_versions(version, name, applied_at)`; every step runs
//! in its own transaction so a failing script leaves the previous version intact.

use super::now_ms;
use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::info;

/// Schema version identifier (monotonically increasing).
pub type SchemaVersion = u32;

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: SchemaVersion,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// All known migrations, ordered by version.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_tables",
        up: include_str!("../../migrations/0001_core_tables.up.sql"),
        down: include_str!("../../migrations/0001_core_tables.down.sql"),
    },
    Migration {
        version: 2,
        name: "notifications",
        up: include_str!("../../migrations/0002_notifications.up.sql"),
        down: include_str!("../../migrations/0002_notifications.down.sql"),
    },
    Migration {
        version: 3,
        name: "app_tokens",
        up: include_str!("../../migrations/0003_app_tokens.up.sql"),
        down: include_str!("../../migrations/0003_app_tokens.down.sql"),
    },
];

/// Latest schema version this binary knows about.
pub fn latest_version() -> SchemaVersion {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Applied/pending state of one migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: SchemaVersion,
    pub name: &'static str,
    pub applied_at: Option<i64>,
}

fn ensure_version_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn applied(conn: &Connection) -> StoreResult<Vec<(SchemaVersion, i64)>> {
    let mut stmt = conn.prepare("SELECT version, applied_at FROM schema_versions ORDER BY version")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Current schema version (0 for an empty database).
pub fn current_version(conn: &Connection) -> StoreResult<SchemaVersion> {
    ensure_version_table(conn)?;
    let version: Option<SchemaVersion> =
        conn.query_row("SELECT MAX(version) FROM schema_versions", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Apply every pending migration. Returns the versions applied.
pub fn migrate_up(conn: &mut Connection) -> StoreResult<Vec<SchemaVersion>> {
    ensure_version_table(conn)?;
    let done: Vec<SchemaVersion> = applied(conn)?.into_iter().map(|(v, _)| v).collect();
    let mut newly_applied = Vec::new();

    for migration in MIGRATIONS.iter().filter(|m| !done.contains(&m.version)) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO schema_versions (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_ms()],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "Applied migration");
        newly_applied.push(migration.version);
    }

    Ok(newly_applied)
}

/// Revert applied migrations newer than `target`, newest first.
pub fn migrate_down(conn: &mut Connection, target: SchemaVersion) -> StoreResult<Vec<SchemaVersion>> {
    ensure_version_table(conn)?;
    let mut done: Vec<SchemaVersion> = applied(conn)?.into_iter().map(|(v, _)| v).collect();
    done.sort_unstable_by(|a, b| b.cmp(a));
    let mut reverted = Vec::new();

    for version in done.into_iter().filter(|v| *v > target) {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| {
                StoreError::Invalid(format!(
                    "schema version {} was applied by a newer build and cannot be reverted",
                    version
                ))
            })?;
        let tx = conn.transaction()?;
        tx.execute_batch(migration.down)?;
        tx.execute(
            "DELETE FROM schema_versions WHERE version = ?1",
            params![version],
        )?;
        tx.commit()?;
        info!(version, name = migration.name, "Reverted migration");
        reverted.push(version);
    }

    Ok(reverted)
}

/// Status of every known migration.
pub fn status(conn: &Connection) -> StoreResult<Vec<MigrationStatus>> {
    ensure_version_table(conn)?;
    let done = applied(conn)?;
    Ok(MIGRATIONS
        .iter()
        .map(|m| MigrationStatus {
            version: m.version,
            name: m.name,
            applied_at: done.iter().find(|(v, _)| *v == m.version).map(|(_, at)| *at),
        })
        .collect())
}

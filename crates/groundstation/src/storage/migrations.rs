//! Database migration system for the telemetry archive.
//!
//! The base schema is always created with `IF NOT EXISTS`; numbered
//! migrations then bring an older archive forward. Each migration runs in its
//! own transaction together with the version bump.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Migrations after the base schema, as `(version, sql)`.
///
/// Version 1 archives predate flight log notes.
const MIGRATIONS: &[(i32, &str)] = &[(2, "ALTER TABLE flight_logs ADD COLUMN note TEXT")];

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist, then runs any
/// pending migrations to bring the schema up to the current version.
///
/// # Errors
///
/// Returns an error if schema creation or migration fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let version = schema_version(conn)?;
    let fresh = version.is_none();

    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    match version {
        None => set_schema_version(conn, CURRENT_VERSION)?,
        Some(v) if v > CURRENT_VERSION => {
            return Err(Error::DatabaseMigration {
                message: format!(
                    "archive schema version {v} is newer than supported version {CURRENT_VERSION}"
                ),
            });
        }
        Some(v) => run_migrations(conn, v)?,
    }

    if fresh {
        info!("Initialized archive schema version {}", CURRENT_VERSION);
    }
    Ok(())
}

/// Read the schema version.
///
/// Returns `None` for a database that has never been initialized.
///
/// # Errors
///
/// Returns an error if the stored version is not a number.
pub fn schema_version(conn: &Connection) -> Result<Option<i32>> {
    let has_metadata: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='metadata'",
        [],
        |row| row.get(0),
    )?;
    if !has_metadata {
        return Ok(None);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value
        .map(|v| {
            v.parse().map_err(|_| Error::DatabaseMigration {
                message: format!("invalid schema version: {v}"),
            })
        })
        .transpose()
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn run_migrations(conn: &mut Connection, from_version: i32) -> Result<()> {
    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > from_version) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| Error::DatabaseMigration {
            message: format!("migration to version {version} failed: {e}"),
        })?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
        info!("Migrated archive schema to version {}", version);
    }
    Ok(())
}

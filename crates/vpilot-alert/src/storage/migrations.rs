//! Bringing a device store up to the current schema.
//!
//! The store may be opened by an older or a newer build. Missing steps are
//! applied one transaction each; a store written by a newer build is refused
//! rather than guessed at.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{SchemaStep, CREATE_METADATA_TABLE, STEPS};

/// Schema version this build writes.
pub const CURRENT_VERSION: i32 = latest(STEPS);

const VERSION_KEY: &str = "schema_version";

const fn latest(steps: &[SchemaStep]) -> i32 {
    match steps.last() {
        Some(step) => step.version,
        None => 0,
    }
}

/// Create or upgrade the schema.
///
/// # Errors
///
/// Returns [`Error::DatabaseMigration`] if the store is newer than this
/// build or holds an unreadable version, and a query error if a step fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "device store has schema {found}, this build supports up to {CURRENT_VERSION}"
            ),
        });
    }

    for step in STEPS.iter().filter(|step| step.version > found) {
        apply(conn, step)?;
    }
    Ok(())
}

/// Version recorded in the store, 0 when none is.
///
/// # Errors
///
/// Returns an error if the metadata table cannot be read or holds garbage.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    raw.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("unreadable schema version {value:?}"),
        })
    })
}

fn apply(conn: &Connection, step: &SchemaStep) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(step.sql)?;
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, step.version.to_string()),
    )?;
    tx.commit()?;
    info!(version = step.version, summary = step.summary, "Device store schema upgraded");
    Ok(())
}

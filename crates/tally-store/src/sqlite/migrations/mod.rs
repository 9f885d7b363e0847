//! Schema migration runner.
//!
//! Migrations are embedded with [`include_str!`] and applied in version
//! order, each inside its own transaction. The `schema_version` table records
//! what has been applied, so running the migrator twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Unread counters keyed by user and conversation",
    sql: include_str!("v001_unread_counters.sql"),
}];

/// Run all pending migrations, returning how many were applied.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] if any migration SQL fails.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to read schema_version: {e}"),
    })
}

/// Latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let fail = |stage: &str, e: rusqlite::Error| StoreError::Migration {
        message: format!("v{} {stage}: {e}", migration.version),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| fail("begin", e))?;
    tx.execute_batch(migration.sql).map_err(|e| fail("apply", e))?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| fail("record", e))?;
    tx.commit().map_err(|e| fail("commit", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn creates_counter_table() {
        let conn = open_memory();
        assert_eq!(run_migrations(&conn).unwrap(), 1);

        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(unread_counters)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();
        for col in ["user_id", "conversation_id", "count", "last_sequence", "updated_at"] {
            assert!(columns.contains(&col.to_string()), "missing column: {col}");
        }
    }

    #[test]
    fn idempotent() {
        let conn = open_memory();
        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn version_starts_at_zero() {
        let conn = open_memory();
        ensure_version_table(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn negative_count_rejected_by_schema() {
        let conn = open_memory();
        let _ = run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO unread_counters (user_id, conversation_id, count, last_sequence, updated_at)
             VALUES ('u', 'c', -1, 0, datetime('now'))",
            [],
        );
        assert!(result.is_err());
    }
}

//! `SQLite` connection pool.
//!
//! The [`PragmaCustomizer`] runs on each new connection so every pooled
//! handle sees WAL mode and the same busy timeout.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size (default: 8).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
    /// How long `pool.get()` waits before reporting the store unavailable.
    pub acquire_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5_000,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))?;
        Ok(())
    }
}

/// Create an in-memory pool.
///
/// Every `SQLite` in-memory connection is its own database, so the pool is
/// capped at a single connection regardless of `config.pool_size`.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    build(SqliteConnectionManager::memory(), 1, config)
}

/// Create a file-backed connection pool.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    build(SqliteConnectionManager::file(path), config.pool_size, config)
}

fn build(
    manager: SqliteConnectionManager,
    max_size: u32,
    config: &ConnectionConfig,
) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(config.acquire_timeout)
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(manager)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

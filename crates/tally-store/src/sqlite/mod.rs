//! `SQLite` plumbing for the durable counter backend.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and busy-timeout pragmas
//!   applied to every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.

pub mod connection;
pub mod migrations;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory,
};
pub use migrations::{current_version, latest_version, run_migrations};

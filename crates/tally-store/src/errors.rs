//! Error types for the counter store.
//!
//! Every backend failure is either *transient* (the store is unavailable
//! right now, callers retry with backoff and treat their last-known value as
//! stale) or a programming/schema problem.

use tally_core::TallyError;
use thiserror::Error;

/// Errors that can occur during counter store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing store temporarily unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (exhausted or database unreachable).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored value violated an invariant (e.g. negative count).
    #[error("corrupt counter row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether a retry may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Pool(_) => true,
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            Self::Migration { .. } | Self::Corrupt(_) => false,
        }
    }
}

impl From<StoreError> for TallyError {
    fn from(err: StoreError) -> Self {
        // Callers only distinguish "store is down"; the detail goes to logs.
        Self::TransientStore(err.to_string())
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

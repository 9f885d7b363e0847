//! `SQLite`-backed counter store.
//!
//! One row per `(user, conversation)` in `unread_counters`. Increments are a
//! single upsert, so per-key atomicity comes from `SQLite` itself; zeroing
//! reads and clears inside an immediate transaction. Snapshots are a single
//! `SELECT`, which `SQLite` evaluates against one consistent read view.

use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tally_core::{ConversationId, UnreadSnapshot, UserId};
use tracing::warn;

use super::{Cleared, CounterStore, CounterUpdate};
use crate::errors::{Result, StoreError};
use crate::sqlite::{ConnectionPool, PooledConnection, run_migrations};

/// Durable [`CounterStore`] over an `r2d2` pool.
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    pool: ConnectionPool,
}

impl SqliteCounterStore {
    /// Wrap a pool, applying pending migrations first.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection> {
        self.pool.get().map_err(|e| {
            warn!(error = %e, "counter store connection unavailable");
            StoreError::Unavailable(e.to_string())
        })
    }
}

fn to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what}={value}")))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("sequence={value} exceeds i64")))
}

impl CounterStore for SqliteCounterStore {
    fn increment(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        sequence: u64,
    ) -> Result<CounterUpdate> {
        let conn = self.conn()?;
        let (count, last_sequence): (i64, i64) = conn.query_row(
            "INSERT INTO unread_counters (user_id, conversation_id, count, last_sequence, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT (user_id, conversation_id) DO UPDATE SET
                 count = count + 1,
                 last_sequence = MAX(last_sequence, excluded.last_sequence),
                 updated_at = excluded.updated_at
             RETURNING count, last_sequence",
            params![
                user.as_str(),
                conversation.as_str(),
                to_i64(sequence)?,
                Utc::now().to_rfc3339()
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CounterUpdate {
            count: to_u64(count, "count")?,
            last_sequence: to_u64(last_sequence, "last_sequence")?,
        })
    }

    fn zero_conversation(&self, user: &UserId, conversation: &ConversationId) -> Result<Cleared> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(i64, i64)> = tx
            .query_row(
                "SELECT count, last_sequence FROM unread_counters
                 WHERE user_id = ?1 AND conversation_id = ?2",
                params![user.as_str(), conversation.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let cleared = match row {
            Some((count, last_sequence)) => {
                if count > 0 {
                    let _ = tx.execute(
                        "UPDATE unread_counters SET count = 0, updated_at = ?3
                         WHERE user_id = ?1 AND conversation_id = ?2",
                        params![user.as_str(), conversation.as_str(), Utc::now().to_rfc3339()],
                    )?;
                }
                Cleared {
                    marked_count: to_u64(count, "count")?,
                    through_sequence: to_u64(last_sequence, "last_sequence")?,
                }
            }
            None => Cleared::default(),
        };
        tx.commit()?;
        Ok(cleared)
    }

    fn count(&self, user: &UserId, conversation: &ConversationId) -> Result<u64> {
        let conn = self.conn()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM unread_counters WHERE user_id = ?1 AND conversation_id = ?2",
                params![user.as_str(), conversation.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        count.map_or(Ok(0), |c| to_u64(c, "count"))
    }

    fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT conversation_id, count, last_sequence FROM unread_counters
             WHERE user_id = ?1 ORDER BY conversation_id",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (conversation, count, last_sequence) = row?;
            entries.push((
                ConversationId::from(conversation),
                to_u64(count, "count")?,
                to_u64(last_sequence, "last_sequence")?,
            ));
        }
        Ok(UnreadSnapshot::from_entries(user.clone(), entries))
    }

    fn users(&self) -> Result<Vec<UserId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT DISTINCT user_id FROM unread_counters")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

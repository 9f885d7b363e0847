//! Lock-striped in-memory counter store.
//!
//! Layout: a [`DashMap`] shards users, each user owns an `RwLock` over its
//! conversation map, and each conversation counter sits behind its own
//! mutex. Increments and zeroes take the user lock shared plus one counter
//! mutex, so writes to different keys of the same user proceed in parallel
//! and different users never share a lock. Snapshots take the user lock
//! exclusively, which excludes every writer of that user for the duration
//! of the read and nobody else.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tally_core::{ConversationId, UnreadSnapshot, UserId};

use super::{Cleared, CounterStore, CounterUpdate};
use crate::errors::Result;

#[derive(Debug, Default)]
struct Cell {
    count: u64,
    last_sequence: u64,
}

#[derive(Debug, Default)]
struct UserCounters {
    cells: RwLock<HashMap<ConversationId, Mutex<Cell>>>,
}

impl UserCounters {
    /// Run `f` on the cell for `conversation`, creating it if needed.
    fn with_cell<R>(&self, conversation: &ConversationId, f: impl FnOnce(&mut Cell) -> R) -> R {
        {
            let cells = self.cells.read();
            if let Some(cell) = cells.get(conversation) {
                return f(&mut cell.lock());
            }
        }
        let mut cells = self.cells.write();
        let cell = cells.entry(conversation.clone()).or_default();
        f(cell.get_mut())
    }
}

/// Process-local [`CounterStore`]. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    users: DashMap<UserId, Arc<UserCounters>>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counters of `user`.
    ///
    /// The `Arc` is cloned out so the `DashMap` shard guard is released
    /// before any per-user lock is taken.
    fn user(&self, user: &UserId) -> Arc<UserCounters> {
        if let Some(existing) = self.users.get(user) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.users.entry(user.clone()).or_default().value())
    }

    fn existing_user(&self, user: &UserId) -> Option<Arc<UserCounters>> {
        self.users.get(user).map(|entry| Arc::clone(entry.value()))
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        sequence: u64,
    ) -> Result<CounterUpdate> {
        Ok(self.user(user).with_cell(conversation, |cell| {
            cell.count = cell.count.saturating_add(1);
            cell.last_sequence = cell.last_sequence.max(sequence);
            CounterUpdate {
                count: cell.count,
                last_sequence: cell.last_sequence,
            }
        }))
    }

    fn zero_conversation(&self, user: &UserId, conversation: &ConversationId) -> Result<Cleared> {
        Ok(self.user(user).with_cell(conversation, |cell| Cleared {
            marked_count: std::mem::take(&mut cell.count),
            through_sequence: cell.last_sequence,
        }))
    }

    fn count(&self, user: &UserId, conversation: &ConversationId) -> Result<u64> {
        Ok(self.user(user).with_cell(conversation, |cell| cell.count))
    }

    fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot> {
        let Some(counters) = self.existing_user(user) else {
            return Ok(UnreadSnapshot::empty(user.clone()));
        };
        let cells = counters.cells.write();
        let entries = cells.iter().map(|(conversation, cell)| {
            let cell = cell.lock();
            (conversation.clone(), cell.count, cell.last_sequence)
        });
        Ok(UnreadSnapshot::from_entries(user.clone(), entries))
    }

    fn users(&self) -> Result<Vec<UserId>> {
        Ok(self.users.iter().map(|entry| entry.key().clone()).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

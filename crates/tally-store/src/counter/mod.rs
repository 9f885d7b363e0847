//! The Counter Store: authoritative unread counts per `(user, conversation)`.
//!
//! Counters are created lazily on first increment or first read and never
//! go negative. Every counter also tracks the highest message sequence it
//! has counted, so snapshots and receipts carry a watermark that clients use
//! to drop deltas they have already seen.

pub mod memory;
pub mod sqlite;

use tally_core::{ConversationId, UnreadSnapshot, UserId};

use crate::errors::Result;

/// Counter value after an increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterUpdate {
    /// Unread count after the increment.
    pub count: u64,
    /// Highest sequence counted so far.
    pub last_sequence: u64,
}

/// What a zeroing operation cleared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cleared {
    /// Unread count immediately before zeroing.
    pub marked_count: u64,
    /// Highest sequence covered by the cleared count.
    pub through_sequence: u64,
}

/// Atomic unread-counter storage.
///
/// Implementations must be linearizable per key: concurrent increments on
/// the same key never lose updates, and a zero racing an increment leaves the
/// counter at either 0 or 1, never negative. Operations on different users
/// must not contend on a shared lock.
pub trait CounterStore: Send + Sync {
    /// Add one unread message with sequence `sequence`.
    fn increment(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        sequence: u64,
    ) -> Result<CounterUpdate>;

    /// Set the counter to zero, returning what it held.
    fn zero_conversation(&self, user: &UserId, conversation: &ConversationId) -> Result<Cleared>;

    /// Current count for one key (0 when the counter does not exist yet).
    fn count(&self, user: &UserId, conversation: &ConversationId) -> Result<u64>;

    /// All counters of `user`, read atomically with respect to that user's
    /// writes. `total` always equals the sum of the map.
    fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot>;

    /// Users that own at least one counter.
    fn users(&self) -> Result<Vec<UserId>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared behaviour tests
// ─────────────────────────────────────────────────────────────────────────────

//! Push events exchanged between the server and connected clients.
//!
//! The wire envelope is an internally tagged JSON object:
//!
//! ```json
//! {"type": "counter_delta", "conversation": "c1", "sequence": 4, "delta": 1}
//! {"type": "read_receipt", "user": "u1", "conversation": "c1", "markedCount": 3, ...}
//! {"type": "snapshot", "user": "u1", "perConversation": {"c1": 2}, "total": 2, ...}
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, SessionId, UserId};

/// One new unread message for the receiving user in `conversation`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDelta {
    /// Conversation that gained an unread message.
    pub conversation: ConversationId,
    /// Per-conversation message sequence number, used for de-duplication.
    pub sequence: u64,
    /// Increment to apply (always 1 for a single message).
    pub delta: u64,
}

impl CounterDelta {
    /// A single-message delta.
    pub fn single(conversation: ConversationId, sequence: u64) -> Self {
        Self {
            conversation,
            sequence,
            delta: 1,
        }
    }
}

/// Record that a user's unread count for a conversation was cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// User who read the conversation.
    pub user: UserId,
    /// Conversation that was marked read.
    pub conversation: ConversationId,
    /// Messages that were unread at the moment of marking.
    pub marked_count: u64,
    /// Highest message sequence covered by this receipt.
    pub through_sequence: u64,
    /// When the server cleared the counter.
    pub emitted_at: DateTime<Utc>,
    /// Session that issued the mark-read, if it came over a push session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionId>,
}

/// Full, authoritative restatement of a user's unread state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSnapshot {
    /// Owner of the counters.
    pub user: UserId,
    /// Unread count per conversation. Conversations with a zeroed counter
    /// may appear with `0`.
    pub per_conversation: BTreeMap<ConversationId, u64>,
    /// Sum of `per_conversation`.
    pub total: u64,
    /// Highest counted message sequence per conversation.
    #[serde(default)]
    pub sequences: BTreeMap<ConversationId, u64>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl UnreadSnapshot {
    /// Build a snapshot from `(conversation, count, last_sequence)` entries.
    ///
    /// The total is computed here so it always equals the sum of the map.
    pub fn from_entries(
        user: UserId,
        entries: impl IntoIterator<Item = (ConversationId, u64, u64)>,
    ) -> Self {
        let mut per_conversation = BTreeMap::new();
        let mut sequences = BTreeMap::new();
        let mut total: u64 = 0;
        for (conversation, count, sequence) in entries {
            total = total.saturating_add(count);
            let _ = sequences.insert(conversation.clone(), sequence);
            let _ = per_conversation.insert(conversation, count);
        }
        Self {
            user,
            per_conversation,
            total,
            sequences,
            taken_at: Utc::now(),
        }
    }

    /// An empty snapshot for a user with no counters.
    pub fn empty(user: UserId) -> Self {
        Self::from_entries(user, std::iter::empty())
    }

    /// Whether `total` equals the sum of the per-conversation map.
    pub fn is_consistent(&self) -> bool {
        self.per_conversation.values().sum::<u64>() == self.total
    }

    /// Number of conversations with at least one unread message.
    pub fn conversations_with_unread(&self) -> usize {
        self.per_conversation.values().filter(|c| **c > 0).count()
    }

    /// Unread count for one conversation (0 when absent).
    pub fn count(&self, conversation: &ConversationId) -> u64 {
        self.per_conversation.get(conversation).copied().unwrap_or(0)
    }
}

/// Server-pushed event envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// First frame on every new session.
    ConnectionEstablished {
        /// Server-assigned session ID.
        session: SessionId,
        /// User the session is bound to.
        user: UserId,
    },
    /// A new unread message.
    CounterDelta(CounterDelta),
    /// A conversation was marked read by one of the user's sessions.
    ReadReceipt(ReadReceipt),
    /// Authoritative replacement of the user's unread state.
    Snapshot(UnreadSnapshot),
}

impl PushEvent {
    /// Wire `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::CounterDelta(_) => "counter_delta",
            Self::ReadReceipt(_) => "read_receipt",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

//! Conversation Registry.
//!
//! Maps a conversation to its two participants so the ingestor knows whose
//! counter a new message increments. Entries are registered when the
//! message-store collaborator reports a new conversation; a lookup miss
//! falls back to an optional [`ConversationSource`] and caches the answer.
//!
//! The registry also hands out per-conversation message sequences for
//! collaborators that do not number their messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tally_core::{Conversation, ConversationId, Result, TallyError, UserId};
use tracing::{debug, warn};

/// Read-through lookup against the system that owns conversations.
pub trait ConversationSource: Send + Sync {
    /// Fetch a conversation by ID, `None` when it does not exist.
    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;
}

#[derive(Debug)]
struct Entry {
    conversation: Conversation,
    sequence: AtomicU64,
}

impl Entry {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            sequence: AtomicU64::new(0),
        }
    }
}

/// Concurrent conversation → participants map.
#[derive(Default)]
pub struct ConversationRegistry {
    entries: DashMap<ConversationId, Entry>,
    source: Option<Arc<dyn ConversationSource>>,
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("len", &self.entries.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl ConversationRegistry {
    /// Registry without a fallback source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that consults `source` on lookup misses.
    pub fn with_source(source: Arc<dyn ConversationSource>) -> Self {
        Self {
            entries: DashMap::new(),
            source: Some(source),
        }
    }

    /// Register a conversation.
    ///
    /// Returns `true` when the entry is new. Re-registering the same
    /// participants is a no-op; a different participant pair is rejected.
    pub fn register(&self, conversation: Conversation) -> Result<bool> {
        if conversation.participants[0] == conversation.participants[1] {
            return Err(TallyError::InvalidRequest(format!(
                "conversation {} has identical participants",
                conversation.id
            )));
        }
        match self.entries.entry(conversation.id.clone()) {
            MapEntry::Occupied(existing) => {
                if existing.get().conversation.same_participants(&conversation) {
                    Ok(false)
                } else {
                    warn!(conversation = %conversation.id, "conflicting participants on re-register");
                    Err(TallyError::InvalidRequest(format!(
                        "conversation {} already registered with different participants",
                        conversation.id
                    )))
                }
            }
            MapEntry::Vacant(slot) => {
                debug!(conversation = %conversation.id, "conversation registered");
                let _ = slot.insert(Entry::new(conversation));
                Ok(true)
            }
        }
    }

    /// Look up a conversation, consulting the source on a miss.
    pub fn get(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        if let Some(entry) = self.entries.get(id) {
            return Ok(Some(entry.conversation.clone()));
        }
        let Some(source) = &self.source else {
            return Ok(None);
        };
        let Some(conversation) = source.get_conversation(id)? else {
            return Ok(None);
        };
        if conversation.id != *id {
            return Err(TallyError::InvalidRequest(format!(
                "source returned {} for lookup of {id}",
                conversation.id
            )));
        }
        let _ = self.register(conversation.clone())?;
        Ok(Some(conversation))
    }

    /// Participants of `id`.
    pub fn participants(&self, id: &ConversationId) -> Result<Option<[UserId; 2]>> {
        Ok(self.get(id)?.map(|c| c.participants))
    }

    /// Whether `id` is registered locally (does not consult the source).
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of locally registered conversations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no conversations are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conversations `user` participates in.
    pub fn conversations_for(&self, user: &UserId) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.conversation.includes(user))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// The participant who receives a message `sender` posts in `id`.
    ///
    /// # Errors
    ///
    /// [`TallyError::NotFound`] for an unknown conversation and
    /// [`TallyError::InvalidRequest`] when `sender` is not a participant.
    pub fn recipient(&self, id: &ConversationId, sender: &UserId) -> Result<UserId> {
        let conversation = self.get(id)?.ok_or_else(|| TallyError::NotFound(id.clone()))?;
        conversation.other_participant(sender).cloned().ok_or_else(|| {
            TallyError::InvalidRequest(format!("{sender} is not a participant of {id}"))
        })
    }

    /// Allocate the next message sequence for `id` (starting at 1).
    pub fn next_sequence(&self, id: &ConversationId) -> Result<u64> {
        let entry = self.entry_or_load(id)?;
        Ok(entry.sequence.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Record an externally assigned sequence so later allocations stay
    /// above it.
    pub fn observe_sequence(&self, id: &ConversationId, sequence: u64) -> Result<()> {
        let entry = self.entry_or_load(id)?;
        let _ = entry.sequence.fetch_max(sequence, Ordering::AcqRel);
        Ok(())
    }

    fn entry_or_load(
        &self,
        id: &ConversationId,
    ) -> Result<dashmap::mapref::one::Ref<'_, ConversationId, Entry>> {
        if let Some(entry) = self.entries.get(id) {
            return Ok(entry);
        }
        if self.get(id)?.is_none() {
            return Err(TallyError::NotFound(id.clone()));
        }
        self.entries
            .get(id)
            .ok_or_else(|| TallyError::NotFound(id.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

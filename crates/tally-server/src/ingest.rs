//! Message ingestion from the message-store collaborator.
//!
//! `on_message_created` resolves the non-sender participant, increments
//! their counter and pushes a `counter_delta` tagged with the message
//! sequence to every session of that user.
//!
//! Messages in one conversation are ingested one at a time: sequence
//! allocation, the increment and the publish all happen under that
//! conversation's lane lock, so sessions receive deltas in sequence order.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use tally_core::{
    Conversation, ConversationId, CounterDelta, MessageCreated, PushEvent, Result, UserId,
};
use tally_store::{ConversationRegistry, CounterStore};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::metrics::DELTAS_PUBLISHED_TOTAL;
use crate::store_retry::with_store_retry;
use crate::websocket::hub::SessionHub;

/// What one ingested message did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaOutcome {
    /// User whose counter was incremented.
    pub recipient: UserId,
    /// Conversation the message belongs to.
    pub conversation: ConversationId,
    /// Sequence the delta was tagged with.
    pub sequence: u64,
    /// Recipient's count after the increment.
    pub count: u64,
    /// Sessions the delta was queued to.
    pub delivered: usize,
}

/// Entry point for collaborator events.
pub struct Ingestor {
    store: Arc<dyn CounterStore>,
    conversations: Arc<ConversationRegistry>,
    hub: Arc<SessionHub>,
    lanes: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl Ingestor {
    /// Wire the ingestor to its collaborators.
    pub fn new(
        store: Arc<dyn CounterStore>,
        conversations: Arc<ConversationRegistry>,
        hub: Arc<SessionHub>,
    ) -> Self {
        Self {
            store,
            conversations,
            hub,
            lanes: DashMap::new(),
        }
    }

    fn lane(&self, conversation: &ConversationId) -> Arc<Mutex<()>> {
        self.lanes.entry(conversation.clone()).or_default().clone()
    }

    /// Register a newly created conversation. `true` if it was new.
    pub fn on_conversation_created(&self, conversation: Conversation) -> Result<bool> {
        self.conversations.register(conversation)
    }

    /// Count a new message against the recipient and push the delta.
    ///
    /// # Errors
    ///
    /// - [`TallyError::NotFound`](tally_core::TallyError::NotFound) for an
    ///   unknown conversation
    /// - [`TallyError::InvalidRequest`](tally_core::TallyError::InvalidRequest)
    ///   when the sender is not a participant
    /// - [`TallyError::TransientStore`](tally_core::TallyError::TransientStore)
    ///   after retries are exhausted
    #[instrument(skip(self, message), fields(conversation = %message.conversation, sender = %message.sender))]
    pub async fn on_message_created(&self, message: MessageCreated) -> Result<DeltaOutcome> {
        let MessageCreated {
            conversation,
            sender,
            sequence,
        } = message;

        let recipient = self.conversations.recipient(&conversation, &sender)?;
        let lane = self.lane(&conversation);
        let _ordered = lane.lock().await;
        let sequence = match sequence {
            Some(sequence) => {
                self.conversations.observe_sequence(&conversation, sequence)?;
                sequence
            }
            None => self.conversations.next_sequence(&conversation)?,
        };

        let update = with_store_retry("increment", || {
            self.store.increment(&recipient, &conversation, sequence)
        })
        .await?;

        let event = PushEvent::CounterDelta(CounterDelta::single(conversation.clone(), sequence));
        let delivered = self.hub.publish_to_user(&recipient, &event, None).await;
        counter!(DELTAS_PUBLISHED_TOTAL).increment(1);
        debug!(%recipient, sequence, count = update.count, delivered, "message counted");

        Ok(DeltaOutcome {
            recipient,
            conversation,
            sequence,
            count: update.count,
            delivered,
        })
    }
}

//! Read-Receipt Processor.
//!
//! `mark_read` zeroes the counter, builds a [`ReadReceipt`] carrying the
//! cleared count and watermark, and fans it out to the user's other
//! sessions. Marking an already-read conversation succeeds with
//! `marked_count == 0`.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tally_core::{ConversationId, PushEvent, ReadReceipt, Result, SessionId, TallyError, UserId};
use tally_store::{ConversationRegistry, CounterStore};
use tracing::{info, instrument};

use crate::metrics::RECEIPTS_PUBLISHED_TOTAL;
use crate::store_retry::with_store_retry;
use crate::websocket::hub::SessionHub;

/// Applies mark-as-read requests.
pub struct ReadReceiptProcessor {
    store: Arc<dyn CounterStore>,
    conversations: Arc<ConversationRegistry>,
    hub: Arc<SessionHub>,
}

impl ReadReceiptProcessor {
    /// Wire the processor to its collaborators.
    pub fn new(
        store: Arc<dyn CounterStore>,
        conversations: Arc<ConversationRegistry>,
        hub: Arc<SessionHub>,
    ) -> Self {
        Self {
            store,
            conversations,
            hub,
        }
    }

    /// Mark `conversation` read for `user`.
    ///
    /// `origin` is the session that asked, if any; it already knows the
    /// outcome from the response and is skipped during fan-out.
    ///
    /// # Errors
    ///
    /// - [`TallyError::NotFound`] when the conversation is not registered
    /// - [`TallyError::InvalidRequest`] when `user` is not a participant
    /// - [`TallyError::TransientStore`] after retries are exhausted
    #[instrument(skip_all, fields(%user, %conversation))]
    pub async fn mark_read(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        origin: Option<SessionId>,
    ) -> Result<ReadReceipt> {
        let Some(found) = self.conversations.get(conversation)? else {
            return Err(TallyError::NotFound(conversation.clone()));
        };
        if !found.includes(user) {
            return Err(TallyError::InvalidRequest(format!(
                "{user} is not a participant of {conversation}"
            )));
        }

        let cleared = with_store_retry("zero_conversation", || {
            self.store.zero_conversation(user, conversation)
        })
        .await?;

        let receipt = ReadReceipt {
            user: user.clone(),
            conversation: conversation.clone(),
            marked_count: cleared.marked_count,
            through_sequence: cleared.through_sequence,
            emitted_at: Utc::now(),
            origin,
        };

        let delivered = self
            .hub
            .publish_to_user(user, &PushEvent::ReadReceipt(receipt.clone()), receipt.origin.as_ref())
            .await;
        counter!(RECEIPTS_PUBLISHED_TOTAL).increment(1);
        info!(
            marked_count = receipt.marked_count,
            through_sequence = receipt.through_sequence,
            delivered,
            "conversation marked read"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tally_core::{Conversation, SessionState};
    use tally_store::MemoryCounterStore;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::websocket::connection::SessionConnection;

    struct Fixture {
        store: Arc<MemoryCounterStore>,
        hub: Arc<SessionHub>,
        processor: ReadReceiptProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCounterStore::new());
        let conversations = Arc::new(ConversationRegistry::new());
        let _ = conversations
            .register(Conversation::new("c1", "buyer", "seller"))
            .unwrap();
        let hub = Arc::new(SessionHub::new());
        let processor = ReadReceiptProcessor::new(store.clone(), conversations, hub.clone());
        Fixture {
            store,
            hub,
            processor,
        }
    }

    async fn open_session(hub: &SessionHub, user: &str, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(8);
        let conn = SessionConnection::new(id.into(), user.into(), tx, CancellationToken::new());
        let _ = conn.transition(SessionState::Open).unwrap();
        hub.add(Arc::new(conn)).await;
        rx
    }

    #[tokio::test]
    async fn marks_and_reports_cleared_count() {
        let f = fixture();
        for seq in 1..=3 {
            let _ = f.store.increment(&"seller".into(), &"c1".into(), seq).unwrap();
        }

        let receipt = f
            .processor
            .mark_read(&"seller".into(), &"c1".into(), None)
            .await
            .unwrap();
        assert_eq!(receipt.marked_count, 3);
        assert_eq!(receipt.through_sequence, 3);
        assert_eq!(f.store.count(&"seller".into(), &"c1".into()).unwrap(), 0);
    }

    #[tokio::test]
    async fn second_mark_is_zero_not_error() {
        let f = fixture();
        let _ = f.store.increment(&"seller".into(), &"c1".into(), 1).unwrap();
        let first = f.processor.mark_read(&"seller".into(), &"c1".into(), None).await.unwrap();
        let second = f.processor.mark_read(&"seller".into(), &"c1".into(), None).await.unwrap();
        assert_eq!(first.marked_count, 1);
        assert_eq!(second.marked_count, 0);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let f = fixture();
        assert_matches!(
            f.processor.mark_read(&"seller".into(), &"nope".into(), None).await,
            Err(TallyError::NotFound(id)) if id.as_str() == "nope"
        );
    }

    #[tokio::test]
    async fn non_participant_is_rejected() {
        let f = fixture();
        assert_matches!(
            f.processor.mark_read(&"mallory".into(), &"c1".into(), None).await,
            Err(TallyError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn receipt_fans_out_to_other_sessions() {
        let f = fixture();
        let _ = f.store.increment(&"seller".into(), &"c1".into(), 1).unwrap();
        let mut origin_rx = open_session(&f.hub, "seller", "tab1").await;
        let mut other_rx = open_session(&f.hub, "seller", "tab2").await;
        let mut buyer_rx = open_session(&f.hub, "buyer", "b1").await;

        let _ = f
            .processor
            .mark_read(&"seller".into(), &"c1".into(), Some("tab1".into()))
            .await
            .unwrap();

        assert!(origin_rx.try_recv().is_err());
        assert!(buyer_rx.try_recv().is_err());
        let frame = other_rx.try_recv().unwrap();
        let event: PushEvent = serde_json::from_str(&frame).unwrap();
        assert_matches!(event, PushEvent::ReadReceipt(r) if r.marked_count == 1 && r.origin.as_ref().map(SessionId::as_str) == Some("tab1"));
    }
}

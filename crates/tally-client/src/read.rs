//! Optimistic mark-as-read.

use std::future::Future;
use std::time::Duration;

use tally_core::{ConversationId, ReadReceipt, Result, SessionId, TallyError, UserId};
use tracing::{debug, warn};

use crate::aggregator::AggregatorHandle;
use crate::api::CounterApi;

/// One mark-as-read round trip.
pub struct MarkRead<'a> {
    /// Server seam.
    pub api: &'a dyn CounterApi,
    /// Local state to zero and settle.
    pub aggregator: &'a AggregatorHandle,
    /// Reader.
    pub user: &'a UserId,
    /// Push session to exclude from the receipt fan-out.
    pub origin: Option<SessionId>,
    /// Round-trip bound.
    pub timeout: Duration,
}

impl MarkRead<'_> {
    /// Zero `conversation` locally, ask the server, then commit the receipt
    /// or roll the zero back.
    ///
    /// Resolving `cancelled` before the server answers rolls back and
    /// returns [`TallyError::Cancelled`]. The server may still have applied
    /// the read; the next snapshot settles it.
    pub async fn run(
        self,
        conversation: &ConversationId,
        cancelled: impl Future<Output = ()>,
    ) -> Result<ReadReceipt> {
        let ticket = self.aggregator.begin_mark(conversation.clone()).await?;

        let outcome = tokio::select! {
            biased;
            () = cancelled => Err(TallyError::Cancelled),
            answer = tokio::time::timeout(
                self.timeout,
                self.api.mark_read(self.user, conversation, self.origin),
            ) => answer.unwrap_or(Err(TallyError::Timeout(self.timeout))),
        };

        match outcome {
            Ok(receipt) => {
                debug!(%conversation, marked_count = receipt.marked_count, "mark read committed");
                self.aggregator.commit_mark(ticket, receipt.clone()).await?;
                Ok(receipt)
            }
            Err(e) => {
                warn!(%conversation, error = %e, retryable = e.is_retryable(), "mark read rolled back");
                let _ = self.aggregator.rollback_mark(ticket).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use tally_core::{CounterDelta, PushEvent, UnreadSnapshot};
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    use crate::aggregator::{UnreadView, spawn_aggregator};
    use crate::api::MockCounterApi;

    fn receipt(marked_count: u64, through_sequence: u64) -> ReadReceipt {
        ReadReceipt {
            user: "seller".into(),
            conversation: "c1".into(),
            marked_count,
            through_sequence,
            emitted_at: Utc::now(),
            origin: None,
        }
    }

    /// Never answers.
    struct HangingApi;

    #[async_trait]
    impl CounterApi for HangingApi {
        async fn snapshot(&self, user: &UserId) -> Result<UnreadSnapshot> {
            Ok(UnreadSnapshot::empty(user.clone()))
        }

        async fn mark_read(
            &self,
            _user: &UserId,
            _conversation: &ConversationId,
            _origin: Option<SessionId>,
        ) -> Result<ReadReceipt> {
            std::future::pending().await
        }
    }

    /// Aggregator holding three unread messages in `c1`.
    async fn seeded() -> (AggregatorHandle, watch::Receiver<UnreadView>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (handle, mut view, _task) = spawn_aggregator("seller".into(), cancel.clone());
        for seq in 1..=3 {
            handle
                .push(PushEvent::CounterDelta(CounterDelta::single("c1".into(), seq)))
                .await
                .unwrap();
        }
        while view.borrow_and_update().total < 3 {
            view.changed().await.unwrap();
        }
        (handle, view, cancel)
    }

    async fn settled_total(view: &mut watch::Receiver<UnreadView>, expected: u64) {
        while view.borrow_and_update().total != expected {
            view.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn success_commits_receipt() {
        let (aggregator, mut view, _cancel) = seeded().await;
        let mut api = MockCounterApi::new();
        let _ = api
            .expect_mark_read()
            .withf(|user, conversation, origin| {
                user.as_str() == "seller" && conversation.as_str() == "c1" && origin.is_some()
            })
            .returning(|_, _, _| Ok(receipt(3, 3)));

        let got = MarkRead {
            api: &api,
            aggregator: &aggregator,
            user: &"seller".into(),
            origin: Some("sess-1".into()),
            timeout: Duration::from_secs(5),
        }
        .run(&"c1".into(), std::future::pending())
        .await
        .unwrap();

        assert_eq!(got.marked_count, 3);
        settled_total(&mut view, 0).await;
    }

    #[tokio::test]
    async fn not_found_rolls_back() {
        let (aggregator, mut view, _cancel) = seeded().await;
        let mut api = MockCounterApi::new();
        let _ = api
            .expect_mark_read()
            .returning(|_, conversation, _| Err(TallyError::NotFound(conversation.clone())));

        let err = MarkRead {
            api: &api,
            aggregator: &aggregator,
            user: &"seller".into(),
            origin: None,
            timeout: Duration::from_secs(5),
        }
        .run(&"c1".into(), std::future::pending())
        .await
        .unwrap_err();

        assert_matches!(err, TallyError::NotFound(_));
        assert!(!err.is_retryable());
        settled_total(&mut view, 3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rolls_back_with_retryable_error() {
        let (aggregator, mut view, _cancel) = seeded().await;
        let err = MarkRead {
            api: &HangingApi,
            aggregator: &aggregator,
            user: &"seller".into(),
            origin: None,
            timeout: Duration::from_secs(10),
        }
        .run(&"c1".into(), std::future::pending())
        .await
        .unwrap_err();

        assert_matches!(err, TallyError::Timeout(_));
        assert!(err.is_retryable());
        settled_total(&mut view, 3).await;
    }

    #[tokio::test]
    async fn cancellation_rolls_back() {
        let (aggregator, mut view, _cancel) = seeded().await;
        let token = CancellationToken::new();
        let trigger = token.clone();

        let call = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                MarkRead {
                    api: &HangingApi,
                    aggregator: &aggregator,
                    user: &"seller".into(),
                    origin: None,
                    timeout: Duration::from_secs(60),
                }
                .run(&"c1".into(), token.cancelled())
                .await
            })
        };

        settled_total(&mut view, 0).await;
        trigger.cancel();
        assert_matches!(call.await.unwrap(), Err(TallyError::Cancelled));
        settled_total(&mut view, 3).await;
    }
}

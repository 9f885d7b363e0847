//! `UnreadClient`: the facade a UI holds.

use std::sync::Arc;

use tally_core::{ConversationId, ReadReceipt, Result, SessionState, UserId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::{AggregatorHandle, UnreadView, spawn_aggregator};
use crate::api::{CounterApi, HttpCounterApi, push_url};
use crate::channel::PushChannel;
use crate::config::ClientConfig;
use crate::poller::Poller;
use crate::read::MarkRead;

/// Channel state transitions buffered for the poller.
const TRANSITION_BUFFER: usize = 32;

/// Live unread counters for one user.
///
/// Owns three tasks: the aggregator, the push channel and the poller. They
/// stop when the client is closed or dropped.
pub struct UnreadClient {
    user: UserId,
    config: ClientConfig,
    api: Arc<dyn CounterApi>,
    aggregator: AggregatorHandle,
    view: watch::Receiver<UnreadView>,
    channel_state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl UnreadClient {
    /// Start tracking `user`. Returns immediately; the view fills in as the
    /// push channel and poller deliver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(user: UserId, config: ClientConfig, api: Arc<dyn CounterApi>) -> Result<Self> {
        let url = push_url(&config.server_url, &user)?;
        let cancel = CancellationToken::new();

        let (aggregator, view, aggregator_task) = spawn_aggregator(user.clone(), cancel.clone());
        let (state_tx, channel_state) = watch::channel(SessionState::Connecting);
        let (transitions, poller_transitions) = broadcast::channel(TRANSITION_BUFFER);

        let channel = PushChannel {
            user: user.clone(),
            url,
            config: config.clone(),
            api: api.clone(),
            aggregator: aggregator.clone(),
            state: state_tx,
            transitions,
        };
        let poller = Poller {
            user: user.clone(),
            api: api.clone(),
            aggregator: aggregator.clone(),
            config: config.poller.clone(),
            transitions: poller_transitions,
        };
        let tasks = vec![
            aggregator_task,
            tokio::spawn(channel.run(cancel.clone())),
            tokio::spawn(poller.run(cancel.clone())),
        ];
        info!(%user, server = %config.server_url, "unread client started");

        Ok(Self {
            user,
            config,
            api,
            aggregator,
            view,
            channel_state,
            cancel,
            tasks,
        })
    }

    /// [`connect`](Self::connect) over the server's HTTP API.
    pub fn connect_http(user: UserId, config: ClientConfig) -> Result<Self> {
        let api = HttpCounterApi::new(&config.server_url, config.mark_read_timeout)?;
        Self::connect(user, config, Arc::new(api))
    }

    /// Tracked user.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Subscribe to view changes.
    pub fn view(&self) -> watch::Receiver<UnreadView> {
        self.view.clone()
    }

    /// Current view.
    pub fn current(&self) -> UnreadView {
        self.view.borrow().clone()
    }

    /// Current push channel state.
    pub fn channel_state(&self) -> SessionState {
        *self.channel_state.borrow()
    }

    /// Mark `conversation` read: zero it locally right away, then commit the
    /// server receipt or roll back.
    pub async fn mark_read(&self, conversation: &ConversationId) -> Result<ReadReceipt> {
        self.mark_read_with_cancel(conversation, &CancellationToken::new())
            .await
    }

    /// [`mark_read`](Self::mark_read) that gives up, rolling back, when
    /// `cancel` fires or the client closes.
    pub async fn mark_read_with_cancel(
        &self,
        conversation: &ConversationId,
        cancel: &CancellationToken,
    ) -> Result<ReadReceipt> {
        let origin = self.view.borrow().session.clone();
        let closed = self.cancel.clone();
        MarkRead {
            api: self.api.as_ref(),
            aggregator: &self.aggregator,
            user: &self.user,
            origin,
            timeout: self.config.mark_read_timeout,
        }
        .run(conversation, async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = closed.cancelled() => {}
            }
        })
        .await
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop every task now. No reconnect attempt survives this call.
    pub fn close(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stop every task and wait for them, letting the push channel send its
    /// close frame.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        info!(user = %self.user, "unread client stopped");
    }
}

impl std::fmt::Debug for UnreadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreadClient")
            .field("user", &self.user)
            .field("server_url", &self.config.server_url)
            .field("channel_state", &*self.channel_state.borrow())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for UnreadClient {
    fn drop(&mut self) {
        self.close();
    }
}

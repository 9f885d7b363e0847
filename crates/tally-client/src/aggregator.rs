//! Client-Side Aggregator.
//!
//! Merges push deltas, read receipts, poll snapshots and optimistic
//! mark-read updates into the one [`UnreadView`] the UI observes. Every input
//! goes through a single mpsc queue drained by one task, so the merge rules
//! in [`UnreadState`] never race.
//!
//! Merge rules:
//! - **Delta**: applied only when its sequence is above the conversation's
//!   watermark; otherwise dropped as stale (duplicate or out of order).
//! - **Receipt**: de-duplicated by `through_sequence`. A receipt covering
//!   everything seen zeroes the conversation; one older than the watermark
//!   subtracts its `marked_count`, clamped at zero, taking it from any
//!   pending optimistic mark first.
//! - **Snapshot**: replaces the per-conversation map outright and raises
//!   watermarks to the snapshot's sequences.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{
    ConversationId, CounterDelta, PushEvent, ReadReceipt, Result, SessionId, SessionState,
    TallyError, UnreadSnapshot, UserId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Depth of the aggregator's input queue.
pub const INPUT_QUEUE_DEPTH: usize = 256;

/// What the UI sees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadView {
    /// Owner of the counters.
    pub user: UserId,
    /// Unread count per conversation.
    pub per_conversation: BTreeMap<ConversationId, u64>,
    /// Sum of `per_conversation`.
    pub total: u64,
    /// Conversations with a count above zero.
    pub conversations_with_unread: usize,
    /// Push channel state.
    pub channel_state: SessionState,
    /// Current push session, while one is established.
    pub session: Option<SessionId>,
    /// When the last applied snapshot was taken.
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Handle for an in-flight optimistic mark-read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarkTicket(u64);

#[derive(Clone, Debug)]
struct PendingMark {
    conversation: ConversationId,
    prior: u64,
}

/// The merge state machine, free of any I/O.
#[derive(Clone, Debug)]
pub struct UnreadState {
    user: UserId,
    counts: BTreeMap<ConversationId, u64>,
    watermarks: HashMap<ConversationId, u64>,
    receipts: HashMap<ConversationId, u64>,
    pending: HashMap<MarkTicket, PendingMark>,
    next_ticket: u64,
    channel_state: SessionState,
    session: Option<SessionId>,
    last_snapshot_at: Option<DateTime<Utc>>,
}

impl UnreadState {
    /// Empty state for `user`.
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            counts: BTreeMap::new(),
            watermarks: HashMap::new(),
            receipts: HashMap::new(),
            pending: HashMap::new(),
            next_ticket: 0,
            channel_state: SessionState::Connecting,
            session: None,
            last_snapshot_at: None,
        }
    }

    /// Count for one conversation.
    pub fn count(&self, conversation: &ConversationId) -> u64 {
        self.counts.get(conversation).copied().unwrap_or(0)
    }

    /// Highest delta sequence applied for `conversation`.
    pub fn watermark(&self, conversation: &ConversationId) -> u64 {
        self.watermarks.get(conversation).copied().unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Optimistic marks not yet committed or rolled back.
    pub fn pending_marks(&self) -> usize {
        self.pending.len()
    }

    /// Apply a new-message delta.
    ///
    /// # Errors
    ///
    /// [`TallyError::StaleDelta`] when the sequence was already covered.
    pub fn apply_delta(&mut self, delta: &CounterDelta) -> Result<()> {
        let watermark = self.watermark(&delta.conversation);
        if delta.sequence <= watermark {
            return Err(TallyError::StaleDelta {
                conversation: delta.conversation.clone(),
                sequence: delta.sequence,
                watermark,
            });
        }
        let count = self.counts.entry(delta.conversation.clone()).or_insert(0);
        *count = count.saturating_add(delta.delta);
        let _ = self
            .watermarks
            .insert(delta.conversation.clone(), delta.sequence);
        Ok(())
    }

    /// Apply a read receipt from any of this user's sessions.
    ///
    /// Returns `false` when the receipt was a duplicate or belongs to
    /// another user.
    pub fn apply_receipt(&mut self, receipt: &ReadReceipt) -> bool {
        if !self.accept_receipt(receipt) {
            return false;
        }
        let conversation = &receipt.conversation;
        if receipt.through_sequence >= self.watermark(conversation) {
            self.zero(conversation, receipt.through_sequence);
        } else {
            self.subtract(conversation, receipt.marked_count);
        }
        true
    }

    /// Replace local state with an authoritative snapshot.
    ///
    /// # Errors
    ///
    /// [`TallyError::InvalidRequest`] for another user's snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &UnreadSnapshot) -> Result<()> {
        if snapshot.user != self.user {
            return Err(TallyError::InvalidRequest(format!(
                "snapshot for {} applied to {}",
                snapshot.user, self.user
            )));
        }
        self.counts.clone_from(&snapshot.per_conversation);
        for (conversation, &sequence) in &snapshot.sequences {
            let watermark = self.watermarks.entry(conversation.clone()).or_insert(0);
            *watermark = (*watermark).max(sequence);
        }
        self.pending.clear();
        self.last_snapshot_at = Some(snapshot.taken_at);
        Ok(())
    }

    /// Zero `conversation` locally ahead of the server's answer.
    pub fn begin_mark(&mut self, conversation: &ConversationId) -> MarkTicket {
        let ticket = MarkTicket(self.next_ticket);
        self.next_ticket += 1;
        let prior = self
            .counts
            .get_mut(conversation)
            .map_or(0, std::mem::take);
        let _ = self.pending.insert(
            ticket,
            PendingMark {
                conversation: conversation.clone(),
                prior,
            },
        );
        ticket
    }

    /// Settle an optimistic mark with the server's receipt.
    ///
    /// The optimistic zero already removed the prior count, so a receipt
    /// older than the watermark leaves newer arrivals alone.
    pub fn commit_mark(&mut self, ticket: MarkTicket, receipt: &ReadReceipt) {
        let _ = self.pending.remove(&ticket);
        if !self.accept_receipt(receipt) {
            return;
        }
        if receipt.through_sequence >= self.watermark(&receipt.conversation) {
            self.zero(&receipt.conversation, receipt.through_sequence);
        }
    }

    /// Undo an optimistic mark. Returns `false` when a snapshot or receipt
    /// already settled the conversation.
    pub fn rollback_mark(&mut self, ticket: MarkTicket) -> bool {
        let Some(mark) = self.pending.remove(&ticket) else {
            return false;
        };
        if mark.prior > 0 {
            let count = self.counts.entry(mark.conversation).or_insert(0);
            *count = count.saturating_add(mark.prior);
        }
        true
    }

    /// Record a push channel state change.
    pub fn set_channel_state(&mut self, state: SessionState) {
        self.channel_state = state;
        if !state.is_open() {
            self.session = None;
        }
    }

    /// Record the server-assigned session.
    pub fn set_session(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    /// Derived view.
    pub fn view(&self) -> UnreadView {
        UnreadView {
            user: self.user.clone(),
            per_conversation: self.counts.clone(),
            total: self.total(),
            conversations_with_unread: self.counts.values().filter(|&&c| c > 0).count(),
            channel_state: self.channel_state,
            session: self.session.clone(),
            last_snapshot_at: self.last_snapshot_at,
        }
    }

    fn accept_receipt(&mut self, receipt: &ReadReceipt) -> bool {
        if receipt.user != self.user {
            return false;
        }
        if let Some(&applied) = self.receipts.get(&receipt.conversation) {
            if receipt.through_sequence <= applied {
                return false;
            }
        }
        let _ = self
            .receipts
            .insert(receipt.conversation.clone(), receipt.through_sequence);
        true
    }

    /// Remove `marked` of the oldest unread messages. Messages held by a
    /// pending optimistic mark are the oldest, so they go first.
    fn subtract(&mut self, conversation: &ConversationId, marked: u64) {
        let mut remaining = marked;
        for mark in self
            .pending
            .values_mut()
            .filter(|mark| mark.conversation == *conversation)
        {
            let taken = remaining.min(mark.prior);
            mark.prior -= taken;
            remaining -= taken;
        }
        if let Some(count) = self.counts.get_mut(conversation) {
            *count = count.saturating_sub(remaining);
        }
    }

    fn zero(&mut self, conversation: &ConversationId, through_sequence: u64) {
        if let Some(count) = self.counts.get_mut(conversation) {
            *count = 0;
        }
        let watermark = self.watermarks.entry(conversation.clone()).or_insert(0);
        *watermark = (*watermark).max(through_sequence);
        self.pending.retain(|_, mark| &mark.conversation != conversation);
    }
}

/// One unit of work for the aggregator task.
#[derive(Debug)]
pub enum AggregatorInput {
    /// Event from the push channel.
    Push(PushEvent),
    /// Snapshot from the reconciliation poller or a reconnect fetch.
    Snapshot(UnreadSnapshot),
    /// Push channel lifecycle change.
    ChannelState(SessionState),
    /// Start an optimistic mark-read.
    BeginMark {
        /// Conversation to zero.
        conversation: ConversationId,
        /// Receives the ticket.
        reply: oneshot::Sender<MarkTicket>,
    },
    /// Settle an optimistic mark-read with the server receipt.
    CommitMark {
        /// Ticket from `BeginMark`.
        ticket: MarkTicket,
        /// Server receipt.
        receipt: ReadReceipt,
    },
    /// Undo an optimistic mark-read.
    RollbackMark {
        /// Ticket from `BeginMark`.
        ticket: MarkTicket,
    },
}

/// Cloneable sender side of the aggregator queue.
#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<AggregatorInput>,
}

impl AggregatorHandle {
    async fn send(&self, input: AggregatorInput) -> Result<()> {
        self.tx.send(input).await.map_err(|_| TallyError::Cancelled)
    }

    /// Queue a push event.
    pub async fn push(&self, event: PushEvent) -> Result<()> {
        self.send(AggregatorInput::Push(event)).await
    }

    /// Queue an authoritative snapshot.
    pub async fn snapshot(&self, snapshot: UnreadSnapshot) -> Result<()> {
        self.send(AggregatorInput::Snapshot(snapshot)).await
    }

    /// Queue a channel state change.
    pub async fn channel_state(&self, state: SessionState) -> Result<()> {
        self.send(AggregatorInput::ChannelState(state)).await
    }

    /// Zero `conversation` optimistically and get a ticket to settle it.
    pub async fn begin_mark(&self, conversation: ConversationId) -> Result<MarkTicket> {
        let (reply, rx) = oneshot::channel();
        self.send(AggregatorInput::BeginMark {
            conversation,
            reply,
        })
        .await?;
        rx.await.map_err(|_| TallyError::Cancelled)
    }

    /// Commit an optimistic mark.
    pub async fn commit_mark(&self, ticket: MarkTicket, receipt: ReadReceipt) -> Result<()> {
        self.send(AggregatorInput::CommitMark { ticket, receipt }).await
    }

    /// Roll back an optimistic mark.
    pub async fn rollback_mark(&self, ticket: MarkTicket) -> Result<()> {
        self.send(AggregatorInput::RollbackMark { ticket }).await
    }
}

fn apply(state: &mut UnreadState, input: AggregatorInput) {
    match input {
        AggregatorInput::Push(PushEvent::CounterDelta(delta)) => {
            if let Err(e) = state.apply_delta(&delta) {
                debug!(conversation = %delta.conversation, sequence = delta.sequence, error = %e, "dropping delta");
            }
        }
        AggregatorInput::Push(PushEvent::ReadReceipt(receipt)) => {
            let applied = state.apply_receipt(&receipt);
            trace!(conversation = %receipt.conversation, marked_count = receipt.marked_count, applied, "receipt");
        }
        AggregatorInput::Push(PushEvent::Snapshot(snapshot)) | AggregatorInput::Snapshot(snapshot) => {
            if let Err(e) = state.apply_snapshot(&snapshot) {
                warn!(error = %e, "ignoring snapshot");
            }
        }
        AggregatorInput::Push(PushEvent::ConnectionEstablished { session, .. }) => {
            state.set_session(session);
        }
        AggregatorInput::ChannelState(channel_state) => state.set_channel_state(channel_state),
        AggregatorInput::BeginMark {
            conversation,
            reply,
        } => {
            let ticket = state.begin_mark(&conversation);
            if reply.send(ticket).is_err() {
                // Caller gave up before getting the ticket.
                let _ = state.rollback_mark(ticket);
            }
        }
        AggregatorInput::CommitMark { ticket, receipt } => state.commit_mark(ticket, &receipt),
        AggregatorInput::RollbackMark { ticket } => {
            let restored = state.rollback_mark(ticket);
            debug!(restored, "optimistic mark rolled back");
        }
    }
}

/// Start the aggregator task for `user`.
///
/// The task runs until `cancel` fires or every handle is dropped.
pub fn spawn_aggregator(
    user: UserId,
    cancel: CancellationToken,
) -> (AggregatorHandle, watch::Receiver<UnreadView>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
    let mut state = UnreadState::new(user);
    let (view_tx, view_rx) = watch::channel(state.view());

    let task = tokio::spawn(async move {
        loop {
            let input = tokio::select! {
                input = rx.recv() => input,
                () = cancel.cancelled() => None,
            };
            let Some(input) = input else { break };
            apply(&mut state, input);

            let next = state.view();
            let _ = view_tx.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
        debug!("aggregator stopped");
    });

    (AggregatorHandle { tx }, view_rx, task)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

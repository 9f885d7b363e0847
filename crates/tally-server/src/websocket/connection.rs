//! Server-side state of one push session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tally_core::{PushEvent, Result, SessionId, SessionState, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::PUSH_DROPS_TOTAL;

/// A connected push session bound to one user.
#[derive(Debug)]
pub struct SessionConnection {
    /// Server-assigned session ID.
    pub id: SessionId,
    /// Owning user.
    pub user: UserId,
    tx: mpsc::Sender<Arc<String>>,
    state: Mutex<SessionState>,
    /// When the upgrade completed.
    pub connected_at: Instant,
    /// Set by any inbound frame, cleared by each heartbeat tick.
    pub is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    /// Events dropped because the outbound queue was full or closed.
    pub dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl SessionConnection {
    /// Create a session in `Connecting`.
    pub fn new(
        id: SessionId,
        user: UserId,
        tx: mpsc::Sender<Arc<String>>,
        closed: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            user,
            tx,
            state: Mutex::new(SessionState::Connecting),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next`, rejecting illegal edges.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        let mut state = self.state.lock();
        let previous = *state;
        *state = previous.transition(next)?;
        debug!(session = %self.id, from = %previous, to = %next, "session state");
        Ok(previous)
    }

    /// Drive the session to `Closed` through `via` (`Closing` or `Erroring`),
    /// whatever state it is in now. Returns the state it was in.
    pub fn finish(&self, via: SessionState) -> SessionState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous.can_transition_to(via) {
            *state = via;
        }
        if state.can_transition_to(SessionState::Closed) {
            *state = SessionState::Closed;
        }
        previous
    }

    /// Enqueue a pre-serialized frame.
    ///
    /// Returns `false` and counts a drop when the queue is full or closed.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(PUSH_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Serialize and enqueue a push event.
    pub fn send_event(&self, event: &PushEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total events dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag. `true` if any frame arrived since the
    /// last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound frame.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Ask the session task to close.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled when the session should stop.
    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

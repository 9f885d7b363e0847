//! Reconciliation Poller.
//!
//! Re-fetches the authoritative snapshot on a fixed cadence and hands it to
//! the aggregator, which replaces its state outright. The cadence widens once
//! the push channel has stayed `Open` for a while and snaps back, with an
//! immediate poll, when a healthy channel fails. Channel transitions arrive
//! one by one over a `broadcast`, so an `Erroring` followed at once by
//! `Closed` still triggers that poll. A failed or timed-out fetch
//! is logged and left for the next interval.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{SessionState, TallyError, UserId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::AggregatorHandle;
use crate::api::CounterApi;
use crate::config::PollerConfig;

/// Delay before the next poll given the channel state and how long it has
/// been open.
pub fn poll_interval(config: &PollerConfig, state: SessionState, open_for: Option<Duration>) -> Duration {
    match open_for {
        Some(open_for) if state.is_open() && open_for >= config.healthy_after => {
            config.healthy_interval
        }
        _ => config.interval,
    }
}

/// Periodic snapshot fetcher.
pub struct Poller {
    /// User whose counters are fetched.
    pub user: UserId,
    /// Snapshot source.
    pub api: Arc<dyn CounterApi>,
    /// Snapshot sink.
    pub aggregator: AggregatorHandle,
    /// Cadence.
    pub config: PollerConfig,
    /// Push channel state transitions.
    pub transitions: broadcast::Receiver<SessionState>,
}

impl Poller {
    /// Poll until `cancel` fires or the aggregator goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut state = SessionState::Connecting;
        let mut open_since = None;
        let mut watching = true;
        let mut next = Instant::now() + self.config.interval;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                transition = self.transitions.recv(), if watching => {
                    let current = match transition {
                        Ok(current) => current,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(user = %self.user, skipped, "missed channel transitions, polling now");
                            state = SessionState::Connecting;
                            open_since = None;
                            if !self.poll_once().await {
                                break;
                            }
                            next = Instant::now() + self.config.interval;
                            continue;
                        }
                        Err(RecvError::Closed) => {
                            watching = false;
                            continue;
                        }
                    };
                    let previous = std::mem::replace(&mut state, current);
                    match state {
                        SessionState::Open => {
                            if open_since.is_none() {
                                open_since = Some(Instant::now());
                            }
                        }
                        SessionState::Erroring if previous.is_open() => {
                            open_since = None;
                            if !self.poll_once().await {
                                break;
                            }
                            next = Instant::now() + self.config.interval;
                        }
                        _ => open_since = None,
                    }
                }
                () = sleep_until(next) => {
                    if !self.poll_once().await {
                        break;
                    }
                    let open_for = open_since.map(|since| since.elapsed());
                    next = Instant::now() + poll_interval(&self.config, state, open_for);
                }
            }
        }
        debug!(user = %self.user, "poller stopped");
    }

    /// One fetch. Returns `false` once the aggregator is gone.
    async fn poll_once(&self) -> bool {
        match timeout(self.config.timeout, self.api.snapshot(&self.user)).await {
            Ok(Ok(snapshot)) => {
                debug!(user = %self.user, total = snapshot.total, "poll snapshot");
                !matches!(self.aggregator.snapshot(snapshot).await, Err(TallyError::Cancelled))
            }
            Ok(Err(e)) => {
                warn!(user = %self.user, error = %e, "poll failed");
                true
            }
            Err(_) => {
                warn!(user = %self.user, timeout_ms = self.config.timeout.as_millis() as u64, "poll timed out");
                true
            }
        }
    }
}

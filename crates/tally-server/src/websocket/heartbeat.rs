//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::SessionConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound frame for `max_missed` consecutive intervals.
    TimedOut {
        /// Intervals missed in a row.
        missed: u32,
    },
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a session's liveness.
///
/// At each `interval` tick the alive flag is checked and reset. A tick with
/// no inbound frame since the previous one counts as a miss; any activity
/// resets the count. `max_missed` consecutive misses end the loop with
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: Arc<SessionConnection>,
    interval: Duration,
    max_missed: u32,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_missed = max_missed.max(1);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut { missed };
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

//! Push session lifecycle: one connected client from upgrade through close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tally_core::{PushEvent, SessionId, SessionState, UserId};
use tally_store::CounterStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::SessionConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::hub::SessionHub;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL,
    WS_SESSION_DURATION_SECONDS,
};
use crate::receipts::ReadReceiptProcessor;
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::store_retry::with_store_retry;

/// How long the outbound forwarder gets to flush its close frame.
const OUTBOUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session task needs, shared across sessions.
pub struct SessionServices {
    /// RPC methods callable over the session.
    pub registry: Arc<MethodRegistry>,
    /// Fan-out hub the session joins while open.
    pub hub: Arc<SessionHub>,
    /// Source of the initial snapshot.
    pub store: Arc<dyn CounterStore>,
    /// Mark-as-read entry point.
    pub receipts: Arc<ReadReceiptProcessor>,
    /// Ping and liveness-check cadence.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before the session is failed.
    pub heartbeat_max_missed: u32,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
}

/// How the session ended: `Erroring` when the peer went silent or the
/// socket failed, `Closing` for an orderly close from either side.
pub(crate) fn close_path(heartbeat: HeartbeatResult, socket_failed: bool) -> SessionState {
    if socket_failed || matches!(heartbeat, HeartbeatResult::TimedOut { .. }) {
        SessionState::Erroring
    } else {
        SessionState::Closing
    }
}

/// Run a push session for a connected client.
///
/// 1. Moves the session to `Open` and queues `connection_established`
/// 2. Joins the hub, then queues the user's current snapshot
/// 3. Forwards queued events and periodic Pings to the socket
/// 4. Dispatches inbound text frames as RPC requests
/// 5. Fails the session after too many silent heartbeat intervals
/// 6. Leaves the hub and reaches `Closed` on every exit path
///
/// Joining the hub before reading the snapshot means a delta can overlap
/// the snapshot; clients drop it by sequence watermark.
#[instrument(skip_all, fields(session = %session_id, user = %user))]
pub async fn run_ws_session(
    ws: WebSocket,
    user: UserId,
    session_id: SessionId,
    services: Arc<SessionServices>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(services.outbound_buffer.max(1));
    let closed = shutdown.child_token();
    let connection = Arc::new(SessionConnection::new(
        session_id.clone(),
        user.clone(),
        send_tx,
        closed.clone(),
    ));

    if let Err(e) = connection.transition(SessionState::Open) {
        warn!(error = %e, "session could not open");
        return;
    }
    let started = Instant::now();
    info!("push session opened");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = connection.send_event(&PushEvent::ConnectionEstablished {
        session: session_id.clone(),
        user: user.clone(),
    });
    services.hub.add(connection.clone()).await;

    match with_store_retry("snapshot", || services.store.snapshot(&user)).await {
        Ok(snapshot) => {
            debug!(total = snapshot.total, "initial snapshot queued");
            let _ = connection.send_event(&PushEvent::Snapshot(snapshot));
        }
        // The client's reconciliation poll fills the gap.
        Err(e) => warn!(error = %e, "initial snapshot unavailable"),
    }

    // Outbound forwarder with periodic Ping frames.
    let outbound_closed = closed.clone();
    let ping_every = services.heartbeat_interval;
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_closed.cancelled() => {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: "session closed".into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let heartbeat = tokio::spawn({
        let connection = connection.clone();
        let closed = closed.clone();
        let interval = services.heartbeat_interval;
        let max_missed = services.heartbeat_max_missed;
        async move {
            let result = run_heartbeat(connection, interval, max_missed, closed.clone()).await;
            if let HeartbeatResult::TimedOut { missed } = result {
                info!(missed, "heartbeat timed out");
                counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                closed.cancel();
            }
            result
        }
    });

    let ctx = RpcContext {
        user: user.clone(),
        session: session_id.clone(),
        store: services.store.clone(),
        receipts: services.receipts.clone(),
    };

    let mut socket_failed = false;
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = closed.cancelled() => break,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "socket error");
                socket_failed = true;
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let result = handle_message(&text, &services.registry, &ctx).await;
        if !connection.send(Arc::new(result.response_json)) {
            warn!(method = result.method, "response dropped, outbound queue full");
        }
    }

    closed.cancel();
    let heartbeat_result = heartbeat.await.unwrap_or(HeartbeatResult::Cancelled);
    let via = close_path(heartbeat_result, socket_failed);
    let previous = connection.finish(via);
    services.hub.remove(&user, &session_id).await;

    if tokio::time::timeout(OUTBOUND_DRAIN_TIMEOUT, outbound).await.is_err() {
        debug!("outbound forwarder did not finish in time");
    }

    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        from = %previous,
        via = %via,
        dropped = connection.drop_count(),
        duration_secs = started.elapsed().as_secs(),
        "push session closed"
    );
}

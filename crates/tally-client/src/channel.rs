//! Client side of the Push Channel Manager.
//!
//! One task owns the WebSocket. It walks the session state machine on every
//! connection, feeds push events to the aggregator, pings the server every
//! heartbeat interval and fails the session after `heartbeat_max_missed`
//! intervals with no inbound frame. Failed or closed sessions are replaced by
//! a brand-new one after an exponential backoff delay; the backoff resets once
//! a session opens.
//!
//! Every state change is validated against the session state machine and
//! published twice: to a `watch` for the latest state and to a `broadcast`
//! that carries each transition to the poller, so a short-lived `Erroring`
//! is never coalesced away.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tally_core::retry::Backoff;
use tally_core::{PushEvent, Result, SessionState, TallyError, UserId};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::AggregatorHandle;
use crate::api::CounterApi;
use crate::config::ClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the channel task needs.
pub struct PushChannel {
    /// Owner of the channel.
    pub user: UserId,
    /// WebSocket endpoint, already carrying the `user` query.
    pub url: Url,
    /// Heartbeat and reconnect settings.
    pub config: ClientConfig,
    /// Snapshot source for reconnects.
    pub api: Arc<dyn CounterApi>,
    /// Where push events go.
    pub aggregator: AggregatorHandle,
    /// Published channel state.
    pub state: watch::Sender<SessionState>,
    /// Every accepted state transition, in order.
    pub transitions: broadcast::Sender<SessionState>,
}

/// Validate a client-side state change. After `Closed` the next session
/// starts over in `Connecting`.
fn advance(current: SessionState, next: SessionState) -> Result<SessionState> {
    if current.is_terminal() && next == SessionState::Connecting {
        return Ok(next);
    }
    current.transition(next)
}

impl PushChannel {
    /// Keep a push session alive until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        let mut reconnecting = false;

        loop {
            self.publish(SessionState::Connecting).await;
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.publish(SessionState::Closing).await;
                    break;
                }
                attempt = connect_async(self.url.as_str()) => attempt,
            };

            match attempt {
                Ok((ws, _)) => {
                    self.publish(SessionState::Open).await;
                    backoff.reset();
                    if reconnecting {
                        self.refresh_snapshot().await;
                    }
                    reconnecting = true;

                    let end = self.drive(ws, &cancel).await;
                    self.publish(end).await;
                }
                Err(e) => {
                    warn!(user = %self.user, attempt = backoff.attempt(), error = %e, "push connect failed");
                    self.publish(SessionState::Erroring).await;
                }
            }
            self.publish(SessionState::Closed).await;

            if cancel.is_cancelled() {
                break;
            }
            let delay = backoff.next_delay();
            info!(user = %self.user, attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "reconnecting push channel");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(SessionState::Closed).await;
        debug!(user = %self.user, "push channel stopped");
    }

    async fn publish(&self, state: SessionState) {
        let mut rejected = None;
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            match advance(*current, state) {
                Ok(next) => {
                    *current = next;
                    true
                }
                Err(e) => {
                    rejected = Some(e);
                    false
                }
            }
        });
        if let Some(e) = rejected {
            warn!(user = %self.user, error = %e, "push channel transition rejected");
            return;
        }
        if changed {
            debug!(user = %self.user, state = state.as_str(), "push channel state");
            let _ = self.transitions.send(state);
            let _ = self.aggregator.channel_state(state).await;
        }
    }

    async fn refresh_snapshot(&self) {
        match timeout(self.config.poller.timeout, self.api.snapshot(&self.user)).await {
            Ok(Ok(snapshot)) => {
                let _ = self.aggregator.snapshot(snapshot).await;
            }
            Ok(Err(e)) => debug!(user = %self.user, error = %e, "reconnect snapshot failed"),
            Err(_) => debug!(user = %self.user, "reconnect snapshot timed out"),
        }
    }

    /// Pump one open session. Returns `Closing` for an orderly end and
    /// `Erroring` when the transport failed or went silent.
    async fn drive(&self, ws: WsStream, cancel: &CancellationToken) -> SessionState {
        let (mut sink, mut stream) = ws.split();
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heard = false;
        let mut missed = 0u32;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionState::Closing;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        heard = true;
                        match serde_json::from_str::<PushEvent>(&text) {
                            Ok(event) => {
                                if let Err(TallyError::Cancelled) = self.aggregator.push(event).await {
                                    let _ = sink.send(Message::Close(None)).await;
                                    return SessionState::Closing;
                                }
                            }
                            Err(e) => debug!(error = %e, "ignoring non-event frame"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(user = %self.user, ?frame, "server closed push session");
                        return SessionState::Closing;
                    }
                    Some(Ok(_)) => heard = true,
                    Some(Err(e)) => {
                        warn!(user = %self.user, error = %e, "push session failed");
                        return SessionState::Erroring;
                    }
                    None => return SessionState::Erroring,
                },
                _ = heartbeat.tick() => {
                    if heard {
                        missed = 0;
                    } else {
                        missed += 1;
                    }
                    heard = false;
                    if missed >= self.config.heartbeat_max_missed {
                        info!(user = %self.user, missed, "push session heartbeat timeout");
                        return SessionState::Erroring;
                    }
                    if sink.send(Message::Ping(Default::default())).await.is_err() {
                        return SessionState::Erroring;
                    }
                }
            }
        }
    }
}

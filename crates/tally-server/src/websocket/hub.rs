//! Fan-out of push events to a user's open sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tally_core::{PushEvent, SessionId, UserId};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::SessionConnection;

/// Open sessions indexed by user, then by session ID.
#[derive(Debug, Default)]
pub struct SessionHub {
    users: RwLock<HashMap<UserId, HashMap<SessionId, Arc<SessionConnection>>>>,
}

impl SessionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open session.
    pub async fn add(&self, connection: Arc<SessionConnection>) {
        let mut users = self.users.write().await;
        let _ = users
            .entry(connection.user.clone())
            .or_default()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a session. The user entry goes away with its last session.
    pub async fn remove(&self, user: &UserId, session: &SessionId) {
        let mut users = self.users.write().await;
        if let Some(sessions) = users.get_mut(user) {
            let _ = sessions.remove(session);
            if sessions.is_empty() {
                let _ = users.remove(user);
            }
        }
    }

    /// Send `event` to every session of `user` except `skip`.
    ///
    /// Returns how many sessions accepted the event. Sessions with a full
    /// queue drop it; delivery is at-least-once at best and the poller
    /// repairs gaps.
    pub async fn publish_to_user(
        &self,
        user: &UserId,
        event: &PushEvent,
        skip: Option<&SessionId>,
    ) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type = event.kind(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let users = self.users.read().await;
        let Some(sessions) = users.get(user) else {
            debug!(%user, event_type = event.kind(), "no open sessions for user");
            return 0;
        };

        let mut delivered = 0;
        for conn in sessions.values() {
            if skip == Some(&conn.id) || !conn.state().is_open() {
                continue;
            }
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                warn!(session = %conn.id, %user, event_type = event.kind(), "session queue full, event dropped");
            }
        }
        debug!(%user, event_type = event.kind(), delivered, "published event");
        delivered
    }

    /// Sessions of `user`.
    pub async fn sessions_for(&self, user: &UserId) -> Vec<Arc<SessionConnection>> {
        let users = self.users.read().await;
        users
            .get(user)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total open sessions.
    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(HashMap::len).sum()
    }

    /// Distinct users with at least one session.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Ask every session to close.
    pub async fn close_all(&self) {
        let users = self.users.read().await;
        for conn in users.values().flat_map(HashMap::values) {
            conn.close();
        }
    }
}

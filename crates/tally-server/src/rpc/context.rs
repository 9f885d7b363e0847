//! Per-session context handed to every RPC handler.

use std::sync::Arc;

use tally_core::{SessionId, UserId};
use tally_store::CounterStore;

use crate::receipts::ReadReceiptProcessor;

/// What a handler may act on: the session's own user and the services
/// behind it. Handlers never act on behalf of another user.
#[derive(Clone)]
pub struct RpcContext {
    /// User the session is bound to.
    pub user: UserId,
    /// Calling session.
    pub session: SessionId,
    /// Authoritative counters.
    pub store: Arc<dyn CounterStore>,
    /// Mark-as-read entry point.
    pub receipts: Arc<ReadReceiptProcessor>,
}

impl std::fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcContext")
            .field("user", &self.user)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

//! Counter handlers: snapshot, single count, mark-as-read.
//!
//! Every handler acts on the session's own user; there is no parameter for
//! reading or clearing someone else's counters.

use async_trait::async_trait;
use serde_json::{Value, json};
use tally_core::ConversationId;
use tracing::instrument;

use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::require_string_param;
use crate::rpc::registry::MethodHandler;
use crate::store_retry::with_store_retry;

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal {
        message: e.to_string(),
    })
}

/// Returns the caller's full unread snapshot.
pub struct GetSnapshotHandler;

#[async_trait]
impl MethodHandler for GetSnapshotHandler {
    #[instrument(skip_all, fields(method = "counter.getSnapshot", user = %ctx.user))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let snapshot = with_store_retry("snapshot", || ctx.store.snapshot(&ctx.user)).await?;
        to_value(&snapshot)
    }
}

/// Returns the caller's count for one conversation.
pub struct GetCountHandler;

#[async_trait]
impl MethodHandler for GetCountHandler {
    #[instrument(skip_all, fields(method = "counter.getCount", user = %ctx.user))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let conversation =
            ConversationId::from(require_string_param(params.as_ref(), "conversationId")?);
        let count = with_store_retry("count", || ctx.store.count(&ctx.user, &conversation)).await?;
        Ok(json!({
            "conversationId": conversation,
            "count": count,
        }))
    }
}

/// Marks a conversation read and returns the resulting receipt.
pub struct MarkReadHandler;

#[async_trait]
impl MethodHandler for MarkReadHandler {
    #[instrument(skip_all, fields(method = "counter.markRead", user = %ctx.user))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let conversation =
            ConversationId::from(require_string_param(params.as_ref(), "conversationId")?);
        let receipt = ctx
            .receipts
            .mark_read(&ctx.user, &conversation, Some(ctx.session.clone()))
            .await?;
        to_value(&receipt)
    }
}

//! RPC handler modules and registration.

pub mod counter;
pub mod system;

use serde_json::Value;

use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodRegistry;

/// Maximum length of an ID parameter.
pub const MAX_ID_LENGTH: usize = 256;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // System
    registry.register("system.ping", system::PingHandler);

    // Counters
    registry.register("counter.getSnapshot", counter::GetSnapshotHandler);
    registry.register("counter.getCount", counter::GetCountHandler);
    registry.register("counter.markRead", counter::MarkReadHandler);
}

/// Extract a required parameter from the params object.
pub(crate) fn require_param<'a>(params: Option<&'a Value>, key: &str) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Missing required parameter: {key}"),
        })
}

/// Extract a required, non-empty string parameter of bounded length.
pub(crate) fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    let value = require_param(params, key)?
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })?;
    if value.is_empty() {
        return Err(RpcError::InvalidParams {
            message: format!("Parameter '{key}' must not be empty"),
        });
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(RpcError::InvalidParams {
            message: format!(
                "Parameter '{key}' exceeds maximum length ({} > {MAX_ID_LENGTH})",
                value.len()
            ),
        });
    }
    Ok(value.to_owned())
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use tally_core::Conversation;
    use tally_store::{ConversationRegistry, MemoryCounterStore};

    use crate::receipts::ReadReceiptProcessor;
    use crate::rpc::context::RpcContext;
    use crate::websocket::hub::SessionHub;

    /// Build an `RpcContext` for user `seller` backed by an in-memory store,
    /// with conversation `c1` between `buyer` and `seller` registered.
    pub fn make_test_context() -> RpcContext {
        make_test_context_with_store(Arc::new(MemoryCounterStore::new()))
    }

    /// Same as [`make_test_context`] over a caller-supplied store.
    pub fn make_test_context_with_store(store: Arc<MemoryCounterStore>) -> RpcContext {
        let conversations = Arc::new(ConversationRegistry::new());
        let _ = conversations
            .register(Conversation::new("c1", "buyer", "seller"))
            .unwrap();
        let hub = Arc::new(SessionHub::new());
        RpcContext {
            user: "seller".into(),
            session: "sess-1".into(),
            store: store.clone(),
            receipts: Arc::new(ReadReceiptProcessor::new(store, conversations, hub)),
        }
    }
}

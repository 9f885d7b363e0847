//! Inbound frame dispatch: parses text as `RpcRequest` and routes through
//! the `MethodRegistry`.

use tracing::{debug, instrument, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::errors::INVALID_PARAMS;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Result of handling one inbound message.
pub struct HandleResult {
    /// Serialized JSON response to send back.
    pub response_json: String,
    /// The RPC method that was called (empty if parse failed).
    pub method: String,
    /// Typed response.
    pub response: RpcResponse,
}

fn serialize(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        String::new()
    })
}

/// Handle an inbound text message.
#[instrument(skip_all, fields(method))]
pub async fn handle_message(message: &str, registry: &MethodRegistry, ctx: &RpcContext) -> HandleResult {
    let request: RpcRequest = match serde_json::from_str(message) {
        Ok(r) => r,
        Err(e) => {
            warn!(session = %ctx.session, "invalid JSON received");
            let response = RpcResponse::error("unknown", INVALID_PARAMS, format!("Invalid JSON: {e}"));
            return HandleResult {
                response_json: serialize(&response),
                method: String::new(),
                response,
            };
        }
    };

    let method = request.method.clone();
    let _ = tracing::Span::current().record("method", method.as_str());
    debug!(method, id = %request.id, "dispatching RPC");

    let response = registry.dispatch(request, ctx).await;
    HandleResult {
        response_json: serialize(&response),
        method,
        response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::register_all;
    use crate::rpc::handlers::test_helpers::make_test_context;

    fn registry() -> MethodRegistry {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        reg
    }

    #[tokio::test]
    async fn dispatches_valid_request() {
        let ctx = make_test_context();
        let result = handle_message(r#"{"id":"1","method":"system.ping"}"#, &registry(), &ctx).await;
        assert_eq!(result.method, "system.ping");
        assert!(result.response.success);
        let parsed: serde_json::Value = serde_json::from_str(&result.response_json).unwrap();
        assert_eq!(parsed["id"], "1");
        assert_eq!(parsed["result"]["pong"], true);
    }

    #[tokio::test]
    async fn invalid_json_yields_error_response() {
        let ctx = make_test_context();
        let result = handle_message("not json", &registry(), &ctx).await;
        assert!(result.method.is_empty());
        assert!(!result.response.success);
        assert_eq!(result.response.id, "unknown");
        assert_eq!(result.response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let ctx = make_test_context();
        let result = handle_message(r#"{"id":"2","method":"counter.explode"}"#, &registry(), &ctx).await;
        assert_eq!(result.method, "counter.explode");
        assert_eq!(result.response.error.unwrap().code, "METHOD_NOT_FOUND");
    }

    #[tokio::test]
    async fn mark_read_over_rpc() {
        let ctx = make_test_context();
        let result = handle_message(
            r#"{"id":"3","method":"counter.markRead","params":{"conversationId":"c1"}}"#,
            &registry(),
            &ctx,
        )
        .await;
        assert!(result.response.success);
        assert_eq!(result.response.result.unwrap()["markedCount"], 0);
    }
}

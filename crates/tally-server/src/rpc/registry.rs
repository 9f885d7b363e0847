//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, warn};

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use crate::rpc::context::RpcContext;
use crate::rpc::errors::{self, RpcError};
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    timeout: Duration,
}

impl MethodRegistry {
    /// Default time a single handler is allowed to run.
    pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: Self::HANDLER_TIMEOUT,
        }
    }

    /// Override the handler timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Dispatch a request to its handler.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> RpcResponse {
        let method = request.method.clone();
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "method_not_found")
                .increment(1);
            return RpcResponse::error(
                &request.id,
                errors::METHOD_NOT_FOUND,
                format!("Method '{method}' not found"),
            );
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, handler.handle(request.params, ctx)).await;

        let response = match result {
            Ok(Ok(result)) => RpcResponse::success(&request.id, result),
            Ok(Err(err)) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => err.code())
                    .increment(1);
                RpcResponse::failure(request.id, err.to_error_body())
            }
            Err(_elapsed) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "timeout")
                    .increment(1);
                error!(method, "RPC handler timed out after {:?}", self.timeout);
                let err = RpcError::Unavailable {
                    message: format!("Handler for '{method}' timed out"),
                };
                RpcResponse::failure(request.id, err.to_error_body())
            }
        };

        let duration = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(duration.as_secs_f64());
        if duration >= Duration::from_secs(1) {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        response
    }

    /// All registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(json!(null)))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Err(RpcError::Internal {
                message: "boom at /secret/path".into(),
            })
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl MethodHandler for SlowHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        }
    }

    fn request(id: &str, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn dispatch_success() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);

        let resp = reg.dispatch(request("r1", "echo", Some(json!({"x": 1}))), &ctx).await;
        assert!(resp.success);
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_method() {
        let ctx = make_test_context();
        let reg = MethodRegistry::new();
        let resp = reg.dispatch(request("r2", "nope", None), &ctx).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().code, errors::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_handler_error_is_sanitized() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);
        let resp = reg.dispatch(request("r3", "fail", None), &ctx).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, errors::INTERNAL_ERROR);
        assert!(!err.message.contains("/secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_times_out() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new().with_timeout(Duration::from_millis(50));
        reg.register("slow", SlowHandler);
        let resp = reg.dispatch(request("r4", "slow", None), &ctx).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, errors::STORE_UNAVAILABLE);
        assert!(err.retryable);
    }

    #[test]
    fn methods_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("b.two", EchoHandler);
        reg.register("a.one", EchoHandler);
        assert_eq!(reg.methods(), vec!["a.one", "b.two"]);
        assert!(reg.has_method("a.one"));
        assert!(!reg.has_method("c.three"));
    }
}

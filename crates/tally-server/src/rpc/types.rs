//! RPC wire-format types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming RPC request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Client-chosen request identifier, echoed in the response.
    pub id: String,
    /// Method name (e.g. `counter.markRead`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload (present when `success == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (present when `success == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error body inside an `RpcResponse`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Machine-readable error code (e.g. `CONVERSATION_NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying the same request may succeed.
    #[serde(default)]
    pub retryable: bool,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response from a body.
    pub fn failure(id: impl Into<String>, error: RpcErrorBody) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Build a non-retryable error response.
    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(
            id,
            RpcErrorBody {
                code: code.into(),
                message: message.into(),
                retryable: false,
            },
        )
    }
}

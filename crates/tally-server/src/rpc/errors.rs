//! RPC error codes and error type.

use tally_core::TallyError;

use crate::rpc::types::RpcErrorBody;

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Generic not-found.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Conversation is not registered.
pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
/// Counter store unavailable; retry later.
pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Specific error code (e.g. `CONVERSATION_NOT_FOUND`).
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Backing store unavailable after retries.
    #[error("{message}")]
    Unavailable {
        /// Description.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::NotFound { code, .. } => code,
            Self::Unavailable { .. } => STORE_UNAVAILABLE,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Whether the client may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Convert to the wire-format error body.
    ///
    /// Internal details are not exposed to clients.
    pub fn to_error_body(&self) -> RpcErrorBody {
        let message = match self {
            Self::Internal { .. } => "Internal error".to_string(),
            other => other.to_string(),
        };
        RpcErrorBody {
            code: self.code().to_owned(),
            message,
            retryable: self.is_retryable(),
        }
    }
}

impl From<TallyError> for RpcError {
    fn from(err: TallyError) -> Self {
        match err {
            TallyError::NotFound(_) => Self::NotFound {
                code: CONVERSATION_NOT_FOUND,
                message: err.to_string(),
            },
            TallyError::InvalidRequest(message) => Self::InvalidParams { message },
            TallyError::TransientStore(_) | TallyError::Timeout(_) => Self::Unavailable {
                message: err.to_string(),
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes() {
        assert_eq!(
            RpcError::InvalidParams { message: "x".into() }.code(),
            INVALID_PARAMS
        );
        assert_eq!(
            RpcError::Unavailable { message: "x".into() }.code(),
            STORE_UNAVAILABLE
        );
        assert_eq!(RpcError::Internal { message: "x".into() }.code(), INTERNAL_ERROR);
    }

    #[test]
    fn not_found_maps_to_conversation_code() {
        let err: RpcError = TallyError::NotFound("c9".into()).into();
        assert_eq!(err.code(), CONVERSATION_NOT_FOUND);
        assert!(err.to_string().contains("c9"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_store_is_retryable() {
        let err: RpcError = TallyError::TransientStore("pool timeout".into()).into();
        assert_matches!(err, RpcError::Unavailable { .. });
        let body = err.to_error_body();
        assert_eq!(body.code, STORE_UNAVAILABLE);
        assert!(body.retryable);
    }

    #[test]
    fn invalid_request_keeps_message() {
        let err: RpcError = TallyError::InvalidRequest("bob is not a participant".into()).into();
        assert_eq!(err.code(), INVALID_PARAMS);
        assert_eq!(err.to_error_body().message, "bob is not a participant");
    }

    #[test]
    fn internal_details_are_hidden() {
        let body = RpcError::Internal {
            message: "failed at /var/lib/tally/unread.db".into(),
        }
        .to_error_body();
        assert_eq!(body.message, "Internal error");
    }
}

//! Error taxonomy shared by the server and client crates.
//!
//! | variant | meaning | policy |
//! |---|---|---|
//! | `TransientStore` | backing store unavailable | retry with backoff, never close a session |
//! | `Channel` | push connection dropped | drive the reconnect state machine |
//! | `NotFound` | unknown conversation on mark-read | surface to caller, no retry |
//! | `StaleDelta` | duplicate/out-of-order delta | drop silently, log at debug |

use std::time::Duration;

use thiserror::Error;

use crate::ids::ConversationId;

/// Errors surfaced by Tally components.
#[derive(Debug, Error)]
pub enum TallyError {
    /// The counter backing store is unavailable.
    #[error("counter store unavailable: {0}")]
    TransientStore(String),

    /// The push connection failed or dropped.
    #[error("push channel error: {0}")]
    Channel(String),

    /// The named conversation is not registered.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    /// A delta was already applied (or is older than the applied watermark).
    #[error("stale delta for {conversation}: sequence {sequence} <= watermark {watermark}")]
    StaleDelta {
        /// Conversation the delta targeted.
        conversation: ConversationId,
        /// Sequence carried by the delta.
        sequence: u64,
        /// Highest sequence already applied.
        watermark: u64,
    },

    /// The request was malformed or violates a domain rule.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled by its owner.
    #[error("operation cancelled")]
    Cancelled,

    /// A frame or response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl TallyError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStore(_) | Self::Channel(_) | Self::Timeout(_)
        )
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientStore(_) => "STORE_UNAVAILABLE",
            Self::Channel(_) => "CHANNEL_ERROR",
            Self::NotFound(_) => "CONVERSATION_NOT_FOUND",
            Self::StaleDelta { .. } => "STALE_DELTA",
            Self::InvalidRequest(_) => "INVALID_PARAMS",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

/// Result type for Tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;

//! Push session lifecycle.
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!     │            │                    ▲
//!     └────────────┴──► Erroring ───────┘
//! ```
//!
//! `Closed` is terminal. A client that wants to reconnect starts a brand-new
//! session in `Connecting`.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TallyError};

/// State of one push session, on either end of the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport handshake in progress.
    #[default]
    Connecting,
    /// Registered and delivering events.
    Open,
    /// Orderly shutdown requested by either side.
    Closing,
    /// Liveness lost or transport failed.
    Erroring,
    /// Torn down. Never left.
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Closed, Closing, Connecting, Erroring, Open};
        matches!(
            (self, next),
            (Connecting, Open | Closing | Erroring)
                | (Open, Closing | Erroring)
                | (Closing | Erroring, Closed)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TallyError::InvalidRequest(format!(
                "illegal session transition {self:?} -> {next:?}"
            )))
        }
    }

    /// Whether the session is gone for good.
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Whether events can be delivered.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Short lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Erroring => "erroring",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! # tally-core
//!
//! Foundation types shared by every Tally crate.
//!
//! - **Branded IDs**: `UserId`, `ConversationId`, `SessionId` as newtypes for type safety
//! - **Domain types**: `Conversation`, `MessageCreated`
//! - **Push events**: `CounterDelta`, `ReadReceipt`, `UnreadSnapshot` and the
//!   tagged `PushEvent` wire envelope
//! - **Errors**: `TallyError` taxonomy via `thiserror`
//! - **Session lifecycle**: the `SessionState` machine shared by both ends of a push channel
//! - **Backoff**: exponential backoff with jitter for reconnects and retries
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod conversation;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod session;

pub use conversation::{Conversation, MessageCreated};
pub use errors::{Result, TallyError};
pub use events::{CounterDelta, PushEvent, ReadReceipt, UnreadSnapshot};
pub use ids::{ConversationId, SessionId, UserId};
pub use session::SessionState;

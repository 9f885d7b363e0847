//! # tally-store
//!
//! Authoritative unread-counter state and conversation routing.
//!
//! - [`CounterStore`]: atomic increment / zero / snapshot keyed by
//!   `(user, conversation)`, with a lock-striped in-memory backend and a
//!   `SQLite` key-value backend
//! - [`ConversationRegistry`]: conversation → participants lookup used to
//!   decide whose counter a new message increments

#![deny(unsafe_code)]

pub mod counter;
pub mod errors;
pub mod registry;
pub mod sqlite;

pub use counter::memory::MemoryCounterStore;
pub use counter::sqlite::SqliteCounterStore;
pub use counter::{Cleared, CounterStore, CounterUpdate};
pub use errors::{Result, StoreError};
pub use registry::{ConversationRegistry, ConversationSource};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};

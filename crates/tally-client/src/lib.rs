//! # tally-client
//!
//! Client side of the unread counters.
//!
//! - **Aggregator**: serialized merge of deltas, receipts and snapshots into an [`UnreadView`]
//! - **Push channel**: WebSocket session with heartbeat and jittered reconnect backoff
//! - **Poller**: periodic snapshot reconciliation
//! - **Mark-read**: optimistic zero with commit or rollback
//! - **`UnreadClient`**: facade that owns all of the above

#![deny(unsafe_code)]

pub mod aggregator;
pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod poller;
pub mod read;

pub use aggregator::{UnreadState, UnreadView};
pub use api::{CounterApi, HttpCounterApi};
pub use client::UnreadClient;
pub use config::{ClientConfig, PollerConfig};

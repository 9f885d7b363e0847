//! # tally-server
//!
//! Axum HTTP + `WebSocket` server for unread counters.
//!
//! - Message ingestion: collaborator events increment the recipient's counter
//!   and push a `counter_delta` to their sessions
//! - Read-Receipt Processor: zero a conversation and fan the receipt out to
//!   the user's other sessions
//! - Push channel: session lifecycle, heartbeat, per-user fan-out hub
//! - RPC over the push channel plus HTTP endpoints for snapshot and mark-read
//! - Prometheus metrics and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod receipts;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod store_retry;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TallyServer;

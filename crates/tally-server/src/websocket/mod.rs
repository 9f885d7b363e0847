//! Push channel: per-session state, heartbeat, fan-out hub and the
//! session task that ties them to a WebSocket.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod session;

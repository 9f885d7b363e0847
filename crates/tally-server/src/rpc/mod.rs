//! Request/response protocol spoken over push sessions.
//!
//! Inbound text frames are `{id, method, params}` requests; each is answered
//! with `{id, success, result | error}` on the same session.

pub mod context;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;

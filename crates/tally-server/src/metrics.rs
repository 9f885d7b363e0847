//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// A handle that renders metrics without touching the global recorder.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Push sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "tally_ws_connections_total";
/// Push sessions currently open (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "tally_ws_connections_active";
/// Sessions closed for missing heartbeats (counter).
pub const WS_HEARTBEAT_TIMEOUTS_TOTAL: &str = "tally_ws_heartbeat_timeouts_total";
/// Push session lifetime (histogram).
pub const WS_SESSION_DURATION_SECONDS: &str = "tally_ws_session_duration_seconds";
/// Counter deltas fanned out (counter).
pub const DELTAS_PUBLISHED_TOTAL: &str = "tally_deltas_published_total";
/// Read receipts fanned out (counter).
pub const RECEIPTS_PUBLISHED_TOTAL: &str = "tally_receipts_published_total";
/// Events dropped on full or closed session queues (counter).
pub const PUSH_DROPS_TOTAL: &str = "tally_push_drops_total";
/// Counter store failures (counter, labels: op).
pub const STORE_ERRORS_TOTAL: &str = "tally_store_errors_total";
/// RPC requests (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "tally_rpc_requests_total";
/// RPC errors (counter, labels: method, `error_type`).
pub const RPC_ERRORS_TOTAL: &str = "tally_rpc_errors_total";
/// RPC latency (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "tally_rpc_request_duration_seconds";

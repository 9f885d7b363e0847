//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open push sessions.
    pub connections: usize,
    /// Distinct users with at least one open session.
    pub users: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    users: usize,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        users,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reflects_shutdown() {
        let resp = health_check(Instant::now(), 0, 0, true);
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 3, 2, false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["connections"], 3);
        assert_eq!(parsed["users"], 2);
        assert!(parsed["uptime_secs"].is_number());
    }
}

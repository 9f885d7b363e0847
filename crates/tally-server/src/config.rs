//! Server configuration.

use std::time::Duration;

use tally_settings::TallySettings;

/// Runtime configuration for [`TallyServer`](crate::server::TallyServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent push sessions; further upgrades get 503.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue depth.
    pub outbound_buffer: usize,
    /// Ping cadence for push sessions.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before a session is closed.
    pub heartbeat_max_missed: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_max_missed: 3,
        }
    }
}

impl From<&TallySettings> for ServerConfig {
    fn from(settings: &TallySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer,
            heartbeat_interval: settings.heartbeat.interval(),
            heartbeat_max_missed: settings.heartbeat.max_missed,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

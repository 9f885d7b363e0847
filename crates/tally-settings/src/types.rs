//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the fields it overrides. Durations are stored as
//! milliseconds and exposed as [`Duration`] through accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::logging::LogFormat;
use tally_core::retry::BackoffConfig;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "heartbeat": { "intervalMs": 15000 },
///   "store": { "backend": "sqlite", "dbPath": "/var/lib/tally/unread.db" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Push-session liveness.
    pub heartbeat: HeartbeatSettings,
    /// Reconciliation poller cadence.
    pub poller: PollerSettings,
    /// Client reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Counter store backend.
    pub store: StoreSettings,
    /// Client-side options.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TallySettings {
    /// Reject combinations that would make the service misbehave.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_owned()));

        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.intervalMs must be > 0");
        }
        if self.heartbeat.max_missed == 0 {
            return invalid("heartbeat.maxMissed must be >= 1");
        }
        if self.poller.interval_ms == 0 || self.poller.timeout_ms == 0 {
            return invalid("poller.intervalMs and poller.timeoutMs must be > 0");
        }
        if self.poller.healthy_interval_ms < self.poller.interval_ms {
            return invalid("poller.healthyIntervalMs must be >= poller.intervalMs");
        }
        if self.reconnect.base_delay_ms == 0 {
            return invalid("reconnect.baseDelayMs must be > 0");
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return invalid("reconnect.maxDelayMs must be >= reconnect.baseDelayMs");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return invalid("reconnect.jitterFactor must be within [0, 1]");
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.db_path.is_none() {
            return invalid("store.dbPath is required for the sqlite backend");
        }
        if self.server.outbound_buffer == 0 {
            return invalid("server.outboundBuffer must be > 0");
        }
        Ok(())
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent push sessions.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue depth before events are dropped.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
        }
    }
}

/// Push-session heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Ping interval in milliseconds.
    pub interval_ms: u64,
    /// Consecutive silent intervals before the session is closed.
    pub max_missed: u32,
}

impl HeartbeatSettings {
    /// Ping interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_missed: 3,
        }
    }
}

/// Reconciliation poller settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollerSettings {
    /// Base poll interval in milliseconds.
    pub interval_ms: u64,
    /// Widened interval once the push channel has been healthy for a while.
    pub healthy_interval_ms: u64,
    /// How long the channel must stay open before widening, in milliseconds.
    pub healthy_after_ms: u64,
    /// Per-fetch timeout in milliseconds.
    pub timeout_ms: u64,
}

impl PollerSettings {
    /// Base poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Widened poll interval.
    pub fn healthy_interval(&self) -> Duration {
        Duration::from_millis(self.healthy_interval_ms)
    }

    /// Sustained-health threshold.
    pub fn healthy_after(&self) -> Duration {
        Duration::from_millis(self.healthy_after_ms)
    }

    /// Per-fetch timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            healthy_interval_ms: 120_000,
            healthy_after_ms: 300_000,
            timeout_ms: 10_000,
        }
    }
}

/// Which counter store implementation to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart.
    #[default]
    Memory,
    /// `SQLite` key-value table.
    Sqlite,
}

/// Counter store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Database file for the sqlite backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Connection pool size for the sqlite backend.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            db_path: None,
            pool_size: 8,
        }
    }
}

/// Client-side settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base HTTP URL of the server; the push URL is derived from it.
    pub server_url: String,
    /// Timeout for a mark-read round trip in milliseconds.
    pub mark_read_timeout_ms: u64,
}

impl ClientSettings {
    /// Mark-read timeout.
    pub fn mark_read_timeout(&self) -> Duration {
        Duration::from_millis(self.mark_read_timeout_ms)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            mark_read_timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl LoggingSettings {
    /// Subscriber format.
    pub fn format(&self) -> LogFormat {
        if self.json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: TallySettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.heartbeat.max_missed, 3);
    }

    #[test]
    fn camel_case_field_names() {
        let json = serde_json::to_value(TallySettings::default()).unwrap();
        assert!(json["heartbeat"].get("intervalMs").is_some());
        assert!(json["poller"].get("healthyIntervalMs").is_some());
        assert!(json["reconnect"].get("jitterFactor").is_some());
        assert!(json["store"].get("dbPath").is_none());
    }

    #[test]
    fn store_backend_lowercase() {
        let s: StoreSettings = serde_json::from_str(r#"{"backend":"sqlite"}"#).unwrap();
        assert_eq!(s.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn duration_accessors() {
        let settings = TallySettings::default();
        assert_eq!(settings.heartbeat.interval(), Duration::from_secs(30));
        assert_eq!(settings.poller.timeout(), Duration::from_secs(10));
        assert_eq!(settings.poller.healthy_interval(), Duration::from_secs(120));
        assert_eq!(settings.client.mark_read_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_zero_missed() {
        let mut settings = TallySettings::default();
        settings.heartbeat.max_missed = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_narrow_healthy_interval() {
        let mut settings = TallySettings::default();
        settings.poller.healthy_interval_ms = 1000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_jitter() {
        let mut settings = TallySettings::default();
        settings.reconnect.jitter_factor = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_cap_below_base() {
        let mut settings = TallySettings::default();
        settings.reconnect.max_delay_ms = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_requires_db_path_for_sqlite() {
        let mut settings = TallySettings::default();
        settings.store.backend = StoreBackend::Sqlite;
        assert!(settings.validate().is_err());
        settings.store.db_path = Some("/tmp/unread.db".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn logging_format() {
        let mut logging = LoggingSettings::default();
        assert_eq!(logging.format(), LogFormat::Compact);
        logging.json = true;
        assert_eq!(logging.format(), LogFormat::Json);
    }
}

//! Client configuration.

use std::time::Duration;

use tally_core::retry::BackoffConfig;
use tally_settings::TallySettings;

/// Reconciliation poll cadence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollerConfig {
    /// Interval while the push channel is degraded or recently opened.
    pub interval: Duration,
    /// Wider interval once the channel has been healthy for `healthy_after`.
    pub healthy_interval: Duration,
    /// How long the channel must stay `Open` before widening.
    pub healthy_after: Duration,
    /// Per-fetch timeout.
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            healthy_interval: Duration::from_secs(120),
            healthy_after: Duration::from_secs(300),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Runtime configuration for [`UnreadClient`](crate::client::UnreadClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base HTTP URL of the server.
    pub server_url: String,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Client ping cadence.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before the channel is failed.
    pub heartbeat_max_missed: u32,
    /// Reconciliation poll cadence.
    pub poller: PollerConfig,
    /// Mark-read round-trip timeout.
    pub mark_read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".into(),
            reconnect: BackoffConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_max_missed: 3,
            poller: PollerConfig::default(),
            mark_read_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TallySettings> for ClientConfig {
    fn from(settings: &TallySettings) -> Self {
        Self {
            server_url: settings.client.server_url.clone(),
            reconnect: settings.reconnect.clone(),
            heartbeat_interval: settings.heartbeat.interval(),
            heartbeat_max_missed: settings.heartbeat.max_missed,
            poller: PollerConfig {
                interval: settings.poller.interval(),
                healthy_interval: settings.poller.healthy_interval(),
                healthy_after: settings.poller.healthy_after(),
                timeout: settings.poller.timeout(),
            },
            mark_read_timeout: settings.client.mark_read_timeout(),
        }
    }
}

//! `tracing` subscriber bootstrap.
//!
//! Log context (user, conversation, session) travels through spans and
//! structured fields rather than formatted strings, so the JSON format is
//! directly queryable.

use serde::{Deserialize, Serialize};

/// Output format for the stderr subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise `level` is used as the filter.
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails when a global subscriber is already installed
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber("warn", LogFormat::Compact);
        init_subscriber("debug", LogFormat::Json);
    }

    #[test]
    fn format_serde() {
        let f: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(f, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}

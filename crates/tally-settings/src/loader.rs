//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TallySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{StoreBackend, TallySettings};

/// Resolve the path to the settings file (`~/.tally/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tally").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TallySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON or the merged settings fail validation,
/// returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<TallySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TallySettings> {
    let defaults = serde_json::to_value(TallySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut TallySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (testable without touching the
/// process environment).
pub fn apply_overrides_from(settings: &mut TallySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TALLY_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Heartbeat / poller ──────────────────────────────────────────
    if let Some(v) = env.u64("TALLY_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = env.u64("TALLY_HEARTBEAT_MAX_MISSED", 1, 100) {
        settings.heartbeat.max_missed = v as u32;
    }
    if let Some(v) = env.u64("TALLY_POLL_INTERVAL_MS", 100, 3_600_000) {
        settings.poller.interval_ms = v;
        settings.poller.healthy_interval_ms = settings.poller.healthy_interval_ms.max(v);
    }
    if let Some(v) = env.u64("TALLY_POLL_TIMEOUT_MS", 100, 600_000) {
        settings.poller.timeout_ms = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_STORE_BACKEND") {
        match v.to_lowercase().as_str() {
            "memory" => settings.store.backend = StoreBackend::Memory,
            "sqlite" => settings.store.backend = StoreBackend::Sqlite,
            _ => tracing::warn!(key = "TALLY_STORE_BACKEND", value = %v, "unknown backend, ignoring"),
        }
    }
    if let Some(v) = env.string("TALLY_DB_PATH") {
        settings.store.db_path = Some(v);
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_SERVER_URL") {
        settings.client.server_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TALLY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TALLY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.u64(name, u64::from(min), u64::from(max))
            .map(|v| v as u16)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

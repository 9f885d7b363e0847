//! Backoff configuration and delay calculation.
//!
//! The push-channel client reconnects with exponential backoff, a cap and
//! symmetric jitter so that a fleet of clients dropped at the same instant
//! does not reconnect in lockstep. The same math drives the server's bounded
//! retry of transient store errors.
//!
//! - [`BackoffConfig`]: base, cap and jitter parameters
//! - [`calculate_backoff_delay_with_random`]: pure delay formula
//! - [`Backoff`]: stateful attempt counter that draws its own randomness

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay before the first retry in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2, i.e. ±20%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Smallest delay the config can produce for `attempt`.
    pub fn min_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            0.0,
        ))
    }

    /// Largest delay the config can produce for `attempt`.
    pub fn max_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            1.0,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`
///
/// `random` should be a value in `[0.0, 1.0]`; it maps to a symmetric jitter
/// range of `[-jitter, +jitter]`.
#[must_use]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Stateful backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Attempt counter producing successive jittered delays.
///
/// Call [`Backoff::next_delay`] after each failure and [`Backoff::reset`]
/// after a success.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh backoff sequence.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with_random(rand::random::<f64>())
    }

    /// Same as [`Backoff::next_delay`] with caller-supplied randomness.
    pub fn next_delay_with_random(&mut self, random: f64) -> Duration {
        let ms = calculate_backoff_delay_with_random(
            self.attempt,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
            self.config.jitter_factor,
            random,
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Backoff parameters.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

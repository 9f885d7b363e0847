//! Bounded retry of transient counter store failures.
//!
//! Server paths never close a session because the store hiccupped. They
//! retry a few times with short jittered backoff and then surface
//! [`TallyError::TransientStore`] to the caller.

use std::time::Duration;

use metrics::counter;
use tally_core::TallyError;
use tally_core::retry::{Backoff, BackoffConfig};
use tally_store::StoreError;
use tracing::warn;

use crate::metrics::STORE_ERRORS_TOTAL;

/// Attempts made before giving up (the first try included).
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff between attempts.
pub fn retry_backoff() -> BackoffConfig {
    BackoffConfig {
        base_delay_ms: 25,
        max_delay_ms: 250,
        jitter_factor: 0.2,
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts its attempts.
pub async fn with_store_retry<T>(
    op_name: &'static str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, TallyError> {
    let mut backoff = Backoff::new(retry_backoff());
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                counter!(STORE_ERRORS_TOTAL, "op" => op_name).increment(1);
                let attempt = backoff.attempt() + 1;
                if !err.is_transient() || attempt >= MAX_ATTEMPTS {
                    warn!(op = op_name, attempt, error = %err, "counter store operation failed");
                    return Err(err.into());
                }
                let delay: Duration = backoff.next_delay();
                warn!(op = op_name, attempt, ?delay, error = %err, "transient store error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_store_retry("test", || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Unavailable("busy".into()))
            } else {
                Ok(calls)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = with_store_retry("test", || {
            calls += 1;
            Err(StoreError::Unavailable("down".into()))
        })
        .await;
        assert_matches!(result, Err(TallyError::TransientStore(_)));
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_store_retry("test", || {
            calls += 1;
            Err(StoreError::Corrupt("count=-1".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}

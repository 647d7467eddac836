//! Bounded retry for blocking work units
//!
//! A decompression task is retried on *any* error: a missing blob, a
//! truncated stream and a decoder failure are all treated the same. Only the
//! number of attempts and the pause between them are configurable.
//!
//! # Example
//!
//! ```no_run
//! use nanopack::config::RetryConfig;
//! use nanopack::retry::run_with_retry;
//!
//! let config = RetryConfig::default();
//! let bytes = run_with_retry(&config, "libnano_0.so", |_attempt| {
//!     Ok(std::fs::read("/tmp/libnano_0.so")?)
//! })?;
//! # Ok::<(), nanopack::Error>(())
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::time::Duration;

/// Run a blocking operation, retrying every failure up to `config.max_retries` times
///
/// The closure receives the 1-based attempt number. Total attempts are
/// `max_retries + 1`. When every attempt fails the result is
/// [`Error::TaskFailed`] naming `unit` and carrying the last cause.
///
/// Sleeps with `std::thread::sleep`, so call it from a blocking context.
pub fn run_with_retry<T, F>(config: &RetryConfig, unit: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(unit, attempts = attempt, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    unit,
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );

                let pause = if config.jitter { add_jitter(delay) } else { delay };
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }

                delay = next_delay(delay, config);
            }
            Err(e) => {
                tracing::error!(
                    unit,
                    error = %e,
                    attempts = attempt,
                    "all attempts failed"
                );
                return Err(Error::TaskFailed {
                    blob: unit.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// A product that is not a representable duration (overflow, NaN) is
/// clamped to `max_delay` instead of panicking.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

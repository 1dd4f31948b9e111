use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::FetchError;

/// Bounded retry policy consumed by the fetcher.
///
/// `max_attempts` counts the first attempt, so the default of 2 means one retry. The delay
/// before each retry is `base_delay + U(0, jitter)`; the defaults give a 100-300ms window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO, jitter: Duration::ZERO }
    }

    /// Delay to wait after `attempt` (1-based) failed, before the next one starts.
    #[must_use]
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        #[allow(clippy::cast_possible_truncation)]
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter_offset = if jitter_ms > 0 { rng.random_range(0..=jitter_ms) } else { 0 };

        tracing::trace!(attempt = attempt, jitter_ms = jitter_offset, "computed retry delay");

        self.base_delay + Duration::from_millis(jitter_offset)
    }

    /// Returns `true` if another attempt should follow `attempt` (1-based) failing with `error`.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }
}

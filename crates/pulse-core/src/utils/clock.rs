//! Time source abstraction.
//!
//! Components that make decisions based on elapsed time (circuit breaker recovery windows,
//! token bucket refill, cache staleness) read time through [`Clock`] instead of calling
//! `Instant::now()` directly. Production code uses [`SystemClock`]; tests use
//! [`ManualClock`] and advance it explicitly.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Monotonic and wall-clock time source.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for elapsed-time decisions.
    fn now(&self) -> Instant;

    /// Wall-clock time used for timestamps reported to callers.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Real system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Both the monotonic and the wall-clock readings advance together.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now(), origin_utc: Utc::now(), offset: Mutex::new(Duration::ZERO) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(*self.offset.lock())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_utc + offset
    }
}

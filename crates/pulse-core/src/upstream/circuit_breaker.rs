use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::utils::clock::SharedClock;

/// Circuit breaker state machine.
///
/// Transitions between states based on failure count and recovery timeout:
/// - `Closed` -> `Open`: When consecutive failures reach the threshold
/// - `Open` -> `HalfOpen`: When the recovery probe interval has elapsed (one probe granted)
/// - `HalfOpen` -> `Closed`: On successful probe
/// - `HalfOpen` -> `Open`: On failed probe (timer reset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failures exceeded threshold, requests are blocked.
    Open,
    /// Recovery mode, exactly one trial request is allowed.
    HalfOpen,
}

impl CircuitStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Thresholds shared by every breaker in a [`CircuitBreakerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time spent open before a single recovery probe is allowed.
    pub recovery_probe_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_probe_interval: Duration::from_secs(30) }
    }
}

/// Point-in-time view of one upstream's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub recovery_probe_interval_ms: u64,
}

/// Internal mutable state protected by a single lock.
///
/// Consolidates the failure count, open timestamp and state so every transition happens
/// within one lock acquisition.
#[derive(Debug)]
struct BreakerInner {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<(Instant, DateTime<Utc>)>,
    /// Set while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker for a single upstream.
///
/// Prevents futile calls to a failing upstream: once `failure_threshold` consecutive failures
/// are recorded the circuit opens, and at most one probe per `recovery_probe_interval` is let
/// through until a probe succeeds.
#[derive(Debug)]
pub struct CircuitBreaker {
    upstream_id: Arc<str>,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(upstream_id: Arc<str>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self { upstream_id, inner: Mutex::new(BreakerInner::new()), config, clock }
    }

    /// Determines whether a request should be made.
    ///
    /// Returns `true` while `Closed`. While `Open`, returns `false` until the recovery interval
    /// has elapsed, then transitions to `HalfOpen` and returns `true` exactly once. Further
    /// calls return `false` until the probe outcome is recorded or the probe is released.
    pub fn should_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let Some((opened_at, _)) = inner.opened_at else {
                    return false;
                };
                if self.clock.now().saturating_duration_since(opened_at)
                    < self.config.recovery_probe_interval
                {
                    return false;
                }
                inner.status = CircuitStatus::HalfOpen;
                inner.probe_in_flight = true;
                tracing::warn!(
                    upstream = %self.upstream_id,
                    "circuit breaker transitioning to half-open state"
                );
                true
            }
            CircuitStatus::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a successful request. Closes the circuit and resets the failure count.
    ///
    /// Returns the resulting status.
    pub fn record_success(&self) -> CircuitStatus {
        let mut inner = self.inner.lock();
        if inner.status != CircuitStatus::Closed {
            tracing::info!(
                upstream = %self.upstream_id,
                "circuit breaker closed after successful request"
            );
        }
        inner.status = CircuitStatus::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.status
    }

    /// Records a failed request.
    ///
    /// In `Closed`, opens the circuit once the threshold is reached. In `HalfOpen`, the failed
    /// probe re-opens the circuit and restarts the recovery timer. In `Open`, only the counter
    /// moves; the timer is left alone so late results from abandoned fetches cannot postpone
    /// recovery.
    ///
    /// Returns the resulting status.
    pub fn record_failure(&self) -> CircuitStatus {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.status {
            CircuitStatus::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.status = CircuitStatus::Open;
                    inner.opened_at = Some((self.clock.now(), self.clock.utc_now()));
                    tracing::warn!(
                        upstream = %self.upstream_id,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opened after reaching failure threshold"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                inner.status = CircuitStatus::Open;
                inner.opened_at = Some((self.clock.now(), self.clock.utc_now()));
                inner.probe_in_flight = false;
                tracing::warn!(
                    upstream = %self.upstream_id,
                    "circuit breaker probe failed, re-opening"
                );
            }
            CircuitStatus::Open => {}
        }

        inner.status
    }

    /// Returns an unused half-open probe slot.
    ///
    /// Used when the probe was granted but the request was then denied elsewhere (e.g. by the
    /// rate limiter) and never sent.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.status == CircuitStatus::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        self.inner.lock().status
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitState {
        let inner = self.inner.lock();
        CircuitState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at.map(|(_, utc)| utc),
            failure_threshold: self.config.failure_threshold,
            recovery_probe_interval_ms: u64::try_from(
                self.config.recovery_probe_interval.as_millis(),
            )
            .unwrap_or(u64::MAX),
        }
    }
}

/// Per-upstream circuit breakers keyed by upstream id.
///
/// Each breaker has its own lock, so unrelated upstreams never contend. Breakers are created
/// lazily on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<Arc<str>, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self { breakers: DashMap::new(), config, clock }
    }

    fn breaker(&self, upstream_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(upstream_id) {
            return Arc::clone(breaker.value());
        }
        let id: Arc<str> = Arc::from(upstream_id);
        Arc::clone(
            self.breakers
                .entry(Arc::clone(&id))
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(id, self.config, Arc::clone(&self.clock)))
                })
                .value(),
        )
    }

    pub fn should_attempt(&self, upstream_id: &str) -> bool {
        self.breaker(upstream_id).should_attempt()
    }

    pub fn record_success(&self, upstream_id: &str) -> CircuitStatus {
        self.breaker(upstream_id).record_success()
    }

    pub fn record_failure(&self, upstream_id: &str) -> CircuitStatus {
        self.breaker(upstream_id).record_failure()
    }

    pub fn release_probe(&self, upstream_id: &str) {
        self.breaker(upstream_id).release_probe();
    }

    #[must_use]
    pub fn status(&self, upstream_id: &str) -> CircuitStatus {
        self.breaker(upstream_id).status()
    }

    #[must_use]
    pub fn failure_count(&self, upstream_id: &str) -> u32 {
        self.breaker(upstream_id).failure_count()
    }

    #[must_use]
    pub fn state(&self, upstream_id: &str) -> CircuitState {
        self.breaker(upstream_id).snapshot()
    }

    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }
}

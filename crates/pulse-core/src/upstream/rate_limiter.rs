use dashmap::DashMap;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::utils::clock::SharedClock;

const WINDOW: Duration = Duration::from_secs(60);

/// Per-upstream rate limiter using the token bucket algorithm.
///
/// Each upstream gets a bucket with capacity `rate_limit_per_minute`, refilled continuously at
/// `capacity / 60` tokens per second. Approvals are additionally bounded by a rolling 60 second
/// window so a full burst followed by a minute of refill can never exceed the per-minute quota.
///
/// [`RateLimiter::allow`] never blocks and never queues: a denied caller skips the fetch for
/// this cycle.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<Arc<str>, TokenBucket>,
    clock: SharedClock,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    /// Approval instants inside the trailing window, oldest first.
    approvals: VecDeque<Instant>,
}

impl TokenBucket {
    fn new(rate_limit_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(rate_limit_per_minute);
        Self {
            capacity,
            refill_per_sec: capacity / WINDOW.as_secs_f64(),
            tokens: capacity,
            last_refill: now,
            approvals: VecDeque::with_capacity(rate_limit_per_minute.min(1024) as usize),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);

        if tokens_to_add > 0.0 {
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn prune_window(&mut self, now: Instant) {
        while let Some(oldest) = self.approvals.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.approvals.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.prune_window(now);

        #[allow(clippy::cast_precision_loss)]
        let window_full = self.approvals.len() as f64 >= self.capacity;

        if self.tokens >= 1.0 && !window_full {
            self.tokens -= 1.0;
            self.approvals.push_back(now);
            true
        } else {
            false
        }
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self { buckets: DashMap::new(), clock }
    }

    /// Registers (or replaces) the bucket for an upstream, starting full.
    pub fn register(&self, upstream_id: &str, rate_limit_per_minute: u32) {
        let bucket = TokenBucket::new(rate_limit_per_minute, self.clock.now());
        self.buckets.insert(Arc::from(upstream_id), bucket);
    }

    /// Takes one token for the upstream if available.
    ///
    /// Unregistered upstreams are always denied.
    #[must_use]
    pub fn allow(&self, upstream_id: &str) -> bool {
        let now = self.clock.now();
        match self.buckets.get_mut(upstream_id) {
            Some(mut bucket) => bucket.try_acquire(now),
            None => {
                tracing::warn!(
                    upstream = %upstream_id,
                    "rate limit check for unregistered upstream"
                );
                false
            }
        }
    }

    /// Drains the upstream's bucket after it answered HTTP 429.
    ///
    /// Refill resumes from now, so the next cycles see a reduced allowance.
    pub fn throttle(&self, upstream_id: &str) {
        let now = self.clock.now();
        if let Some(mut bucket) = self.buckets.get_mut(upstream_id) {
            bucket.tokens = 0.0;
            bucket.last_refill = now;
            tracing::debug!(upstream = %upstream_id, "rate limiter throttled after upstream 429");
        }
    }

    /// Tokens currently available, after applying refill.
    #[must_use]
    pub fn tokens_remaining(&self, upstream_id: &str) -> Option<f64> {
        let now = self.clock.now();
        self.buckets.get_mut(upstream_id).map(|mut bucket| {
            bucket.refill(now);
            bucket.tokens
        })
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

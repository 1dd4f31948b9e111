use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    cache::SnapshotCache,
    metrics::MetricsCollector,
    types::{ResourceKey, UpstreamTarget},
    upstream::{circuit_breaker::CircuitBreakerRegistry, fetcher::FetchOutcome},
};

/// Applies fetch outcomes to the shared cache and circuit breakers.
///
/// Shared by the aggregator's fetch tasks and the health reporter. Runs inside the fetch task
/// itself, so a result that arrives after the snapshot was returned is still recorded.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<SnapshotCache>,
    metrics: Arc<MetricsCollector>,
}

impl OutcomeRecorder {
    #[must_use]
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<SnapshotCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { breakers, cache, metrics }
    }

    /// Records the outcome. Returns the cache timestamp for successful fetches.
    ///
    /// Skipped fetches made no call, so they leave the breaker untouched.
    pub fn apply(
        &self,
        target: &UpstreamTarget,
        key: &ResourceKey,
        outcome: &FetchOutcome,
    ) -> Option<DateTime<Utc>> {
        let before = self.breakers.status(&target.id);

        let (after, fetched_at) = match &outcome.result {
            Ok(value) => {
                let fetched_at = self.cache.put(&target.id, key, value.clone(), target.cache_ttl);
                (self.breakers.record_success(&target.id), Some(fetched_at))
            }
            Err(e) if e.counts_as_failure() => (self.breakers.record_failure(&target.id), None),
            Err(_) => return None,
        };

        if before != after {
            self.metrics.record_circuit_breaker_transition(&target.id, after);
        }
        self.metrics.record_circuit_breaker_state(
            &target.id,
            after,
            self.breakers.failure_count(&target.id),
        );

        fetched_at
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }
}

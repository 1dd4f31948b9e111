//! Core component container for the pulse runtime.

use crate::{
    aggregator::Aggregator,
    cache::SnapshotCache,
    metrics::MetricsCollector,
    upstream::{
        circuit_breaker::CircuitBreakerRegistry, health::HealthReporter,
        rate_limiter::RateLimiter, registry::EndpointRegistry,
    },
};
use std::sync::Arc;

/// Container for all initialized core components.
///
/// The rate limiter, breakers and cache are shared by the aggregator and the health reporter;
/// the HTTP pools behind them are not.
#[derive(Clone)]
pub struct PulseComponents {
    metrics_collector: Arc<MetricsCollector>,
    registry: Arc<EndpointRegistry>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<SnapshotCache>,
    aggregator: Arc<Aggregator>,
    health_reporter: Arc<HealthReporter>,
}

impl PulseComponents {
    /// Called by `PulseRuntimeBuilder` during initialization.
    #[must_use]
    pub fn new(
        metrics_collector: Arc<MetricsCollector>,
        registry: Arc<EndpointRegistry>,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<SnapshotCache>,
        aggregator: Arc<Aggregator>,
        health_reporter: Arc<HealthReporter>,
    ) -> Self {
        Self {
            metrics_collector,
            registry,
            rate_limiter,
            breakers,
            cache,
            aggregator,
            health_reporter,
        }
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics_collector
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// The reporter always exists so the status table can be served; whether it probes in the
    /// background is decided by the builder.
    #[must_use]
    pub fn health_reporter(&self) -> &Arc<HealthReporter> {
        &self.health_reporter
    }
}

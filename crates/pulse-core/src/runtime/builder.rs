//! Builder pattern for initializing the pulse runtime with configurable components.

use crate::{
    aggregator::{Aggregator, OutcomeRecorder},
    cache::SnapshotCache,
    config::AppConfig,
    metrics::MetricsCollector,
    upstream::{
        circuit_breaker::CircuitBreakerRegistry,
        fetcher::Fetcher,
        health::HealthReporter,
        http_client::{HttpClient, HttpClientConfig},
        rate_limiter::RateLimiter,
        registry::EndpointRegistry,
        retry::RetryPolicy,
    },
    utils::clock::{SharedClock, SystemClock},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::PulseRuntime, PulseComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("No upstreams configured")]
    NoUpstreams,

    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_reporter: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_health_reporter: false, shutdown_channel_capacity: 16 }
    }
}

/// Builder for constructing a [`PulseRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use pulse_core::{config::AppConfig, runtime::PulseRuntimeBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = PulseRuntimeBuilder::new()
///     .with_config(AppConfig::load()?)
///     .enable_health_reporter()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PulseRuntimeBuilder {
    config: Option<AppConfig>,
    clock: Option<SharedClock>,
    options: RuntimeOptions,
}

impl PulseRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, clock: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the system clock used by the rate limiter, breakers, cache and snapshots.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Starts one background prober per upstream on `health.interval_seconds`.
    #[must_use]
    pub fn enable_health_reporter(mut self) -> Self {
        self.options.enable_health_reporter = true;
        self
    }

    #[must_use]
    pub fn disable_health_reporter(mut self) -> Self {
        self.options.enable_health_reporter = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the runtime and starts background tasks.
    ///
    /// Must be called inside a tokio runtime when the health reporter is enabled.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if configuration is missing or invalid, no upstreams are
    /// configured, or an HTTP client cannot be built.
    pub fn build(self) -> Result<PulseRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;

        if config.upstreams.is_empty() {
            return Err(RuntimeError::NoUpstreams);
        }
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            upstreams_count = config.upstreams.len(),
            health_reporter_enabled = self.options.enable_health_reporter,
            wall_clock_budget_ms = config.aggregator.wall_clock_budget_ms,
            "initializing pulse runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let targets =
            config.to_targets().map_err(|e| RuntimeError::ConfigValidation(e.to_string()))?;
        let registry = Arc::new(
            EndpointRegistry::from_targets(targets)
                .map_err(|e| RuntimeError::ConfigValidation(e.to_string()))?,
        );
        debug!(upstreams = registry.len(), "endpoint registry initialized");

        let metrics_collector = Arc::new(MetricsCollector::new());

        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
        for target in registry.all() {
            rate_limiter.register(&target.id, target.rate_limit_per_minute);
        }
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker_config(),
            Arc::clone(&clock),
        ));
        let cache = Arc::new(SnapshotCache::new(Arc::clone(&clock)));
        let recorder = OutcomeRecorder::new(
            Arc::clone(&breakers),
            Arc::clone(&cache),
            Arc::clone(&metrics_collector),
        );

        // Separate pools keep user traffic and probing from starving each other
        let aggregator_http = Arc::new(
            HttpClient::with_config(HttpClientConfig {
                concurrent_limit: config.aggregator.concurrency_limit,
                ..HttpClientConfig::default()
            })
            .map_err(|e| RuntimeError::Initialization(format!("aggregator http client: {e}")))?,
        );
        let health_http = Arc::new(
            HttpClient::with_config(HttpClientConfig {
                concurrent_limit: config.health.concurrency_limit,
                ..HttpClientConfig::default()
            })
            .map_err(|e| RuntimeError::Initialization(format!("health http client: {e}")))?,
        );

        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&registry),
            Arc::new(Fetcher::new(
                aggregator_http,
                Arc::clone(&breakers),
                Arc::clone(&rate_limiter),
                config.retry_policy(),
                Arc::clone(&metrics_collector),
            )),
            recorder.clone(),
            Arc::clone(&clock),
            Arc::clone(&metrics_collector),
            config.aggregator_config(),
        ));
        debug!(
            concurrency_limit = config.aggregator.concurrency_limit,
            "aggregator initialized"
        );

        // One probe is one request; the next tick is the retry
        let health_reporter = Arc::new(HealthReporter::new(
            Arc::clone(&registry),
            Arc::new(Fetcher::new(
                health_http,
                Arc::clone(&breakers),
                Arc::clone(&rate_limiter),
                RetryPolicy::none(),
                Arc::clone(&metrics_collector),
            )),
            recorder,
            clock,
            Arc::clone(&metrics_collector),
            config.health_check_interval(),
        ));
        debug!(
            concurrency_limit = config.health.concurrency_limit,
            interval_seconds = config.health.interval_seconds,
            "health reporter initialized"
        );

        let components = PulseComponents::new(
            metrics_collector,
            registry,
            rate_limiter,
            breakers,
            cache,
            aggregator,
            health_reporter,
        );
        let runtime = PulseRuntime::new(
            components,
            shutdown_tx,
            config,
            self.options.enable_health_reporter,
        );

        info!("pulse runtime initialization complete");

        Ok(runtime)
    }
}

impl Default for PulseRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! # Metrics
//!
//! Prometheus metrics recorded through the `metrics` facade. Every record call is a lock-free
//! counter, gauge or histogram update, so components call them inline on the fetch path.
//!
//! Upstream ids are interned to `&'static str` label values. The set of upstreams is fixed by
//! configuration, so the pool is bounded.
//!
//! Resource labels use [`ResourceKey::as_label`](crate::types::ResourceKey::as_label), never
//! the collection slug, to keep label cardinality flat.

use crate::{
    types::Completeness,
    upstream::{circuit_breaker::CircuitStatus, errors::FetchError},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{
    borrow::Cow,
    sync::{Arc, OnceLock},
    time::Duration,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

static UPSTREAM_NAME_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn upstream_to_static(upstream: &str) -> Cow<'static, str> {
    let pool = UPSTREAM_NAME_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(upstream) {
        return Cow::Borrowed(*interned);
    }

    let owned = upstream.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

pub trait MetricsState {
    fn as_metric_str(&self) -> &'static str;
    fn as_gauge_value(&self) -> f64;
}

impl MetricsState for CircuitStatus {
    fn as_metric_str(&self) -> &'static str {
        self.as_str()
    }

    fn as_gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 0.5,
        }
    }
}

impl MetricsState for FetchError {
    fn as_metric_str(&self) -> &'static str {
        self.kind().as_str()
    }

    fn as_gauge_value(&self) -> f64 {
        match self {
            Self::Skipped(_) => 0.0,
            Self::Timeout | Self::Transport(_) => 0.5,
            Self::Upstream { status, .. } if *status == 429 => 0.5,
            Self::Upstream { .. } | Self::Parse(_) => 1.0,
        }
    }
}

impl MetricsState for Completeness {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Empty => "empty",
        }
    }

    fn as_gauge_value(&self) -> f64 {
        match self {
            Self::Complete => 0.0,
            Self::Partial => 0.5,
            Self::Empty => 1.0,
        }
    }
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install prometheus recorder, using detached fallback"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

fn as_seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Records aggregation-layer metrics and renders the Prometheus exposition text.
#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Installs the global Prometheus recorder on first use and returns a collector bound to it.
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    // Fetch Metrics

    /// Record one completed fetch (after retries), live or failed.
    pub fn record_fetch(
        &self,
        upstream: &str,
        resource: &'static str,
        success: bool,
        latency: Duration,
    ) {
        let upstream_cow = upstream_to_static(upstream);
        let outcome = if success { "success" } else { "failure" };

        counter!(
            "pulse_fetch_total",
            "upstream" => upstream_cow.clone(),
            "resource" => resource,
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "pulse_fetch_duration_seconds",
            "upstream" => upstream_cow,
            "resource" => resource
        )
        .record(as_seconds(latency));
    }

    /// Record a fetch error by taxonomy kind.
    pub fn record_fetch_error(&self, upstream: &str, error: &FetchError) {
        let upstream_cow = upstream_to_static(upstream);
        counter!(
            "pulse_fetch_errors_total",
            "upstream" => upstream_cow.clone(),
            "kind" => error.as_metric_str()
        )
        .increment(1);

        if let FetchError::Upstream { status, .. } = error {
            counter!(
                "pulse_upstream_http_errors_total",
                "upstream" => upstream_cow,
                "status" => status.to_string()
            )
            .increment(1);
        }
    }

    /// Record a retry attempt with its backoff delay
    pub fn record_retry_attempt(&self, upstream: &str, attempt: u32, delay: Duration) {
        let upstream_cow = upstream_to_static(upstream);
        counter!(
            "pulse_retry_attempts_total",
            "upstream" => upstream_cow.clone(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
        histogram!("pulse_retry_delay_seconds", "upstream" => upstream_cow)
            .record(as_seconds(delay));
    }

    // Rate Limiter Metrics

    pub fn record_rate_limit(&self, upstream: &str, allowed: bool, tokens_remaining: f64) {
        let upstream_cow = upstream_to_static(upstream);
        if !allowed {
            counter!("pulse_rate_limit_rejected_total", "upstream" => upstream_cow.clone())
                .increment(1);
        }
        gauge!("pulse_rate_limit_tokens", "upstream" => upstream_cow).set(tokens_remaining);
    }

    /// Record an upstream 429 that drained the local bucket
    pub fn record_rate_limit_throttle(&self, upstream: &str) {
        counter!("pulse_rate_limit_throttled_total", "upstream" => upstream_to_static(upstream))
            .increment(1);
    }

    // Circuit Breaker Metrics

    pub fn record_circuit_breaker_state(
        &self,
        upstream: &str,
        state: CircuitStatus,
        failure_count: u32,
    ) {
        let upstream_cow = upstream_to_static(upstream);
        gauge!("pulse_circuit_breaker_state", "upstream" => upstream_cow.clone())
            .set(state.as_gauge_value());
        gauge!("pulse_circuit_breaker_failure_count", "upstream" => upstream_cow)
            .set(f64::from(failure_count));
    }

    /// Record a breaker state change
    pub fn record_circuit_breaker_transition(&self, upstream: &str, to_state: CircuitStatus) {
        counter!(
            "pulse_circuit_breaker_transitions_total",
            "upstream" => upstream_to_static(upstream),
            "to_state" => to_state.as_metric_str()
        )
        .increment(1);
    }

    // Cache Metrics

    /// Record a cache fallback after a failed or missing live fetch.
    ///
    /// `hit` is `false` when no cached value existed and the field was omitted.
    pub fn record_cache_fallback(&self, upstream: &str, resource: &'static str, hit: bool) {
        let outcome = if hit { "served" } else { "omitted" };
        counter!(
            "pulse_cache_fallback_total",
            "upstream" => upstream_to_static(upstream),
            "resource" => resource,
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_cache_entries(&self, entries: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("pulse_cache_entries").set(entries as f64);
    }

    // Snapshot Metrics

    pub fn record_snapshot(
        &self,
        completeness: Completeness,
        duration: Duration,
        live: usize,
        cached: usize,
    ) {
        counter!("pulse_snapshots_total", "completeness" => completeness.as_metric_str())
            .increment(1);
        histogram!("pulse_snapshot_duration_seconds").record(as_seconds(duration));
        #[allow(clippy::cast_precision_loss)]
        {
            histogram!("pulse_snapshot_fields", "source" => "live").record(live as f64);
            histogram!("pulse_snapshot_fields", "source" => "cache").record(cached as f64);
        }
    }

    /// Record fetches still pending when the wall-clock budget expired
    pub fn record_abandoned_fetches(&self, count: usize) {
        counter!("pulse_fetches_abandoned_total").increment(count as u64);
    }

    // Health Check Metrics

    pub fn record_health_check(&self, upstream: &str, success: bool, response_time: Duration) {
        let upstream_cow = upstream_to_static(upstream);
        histogram!("pulse_health_check_duration_seconds", "upstream" => upstream_cow.clone())
            .record(as_seconds(response_time));

        if success {
            counter!("pulse_health_check_success_total", "upstream" => upstream_cow.clone())
                .increment(1);
        } else {
            counter!("pulse_health_check_failure_total", "upstream" => upstream_cow.clone())
                .increment(1);
        }
        gauge!("pulse_upstream_operational", "upstream" => upstream_cow)
            .set(if success { 1.0 } else { 0.0 });
    }

    pub fn record_healthy_upstream_count(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("pulse_healthy_upstreams").set(count as f64);
    }

    /// Get current metrics as a string (for Prometheus endpoint)
    #[must_use]
    pub fn get_prometheus_metrics(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Convenience constructor returning a shared collector.
#[must_use]
pub fn init_metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new())
}

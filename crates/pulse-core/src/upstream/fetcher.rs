use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    circuit_breaker::CircuitBreakerRegistry,
    errors::{FetchError, SkipReason},
    http_client::{HttpClient, UpstreamRequest},
    normalizer::{normalizer_for, ResponseNormalizer},
    rate_limiter::RateLimiter,
    retry::RetryPolicy,
};
use crate::{
    metrics::MetricsCollector,
    types::{NormalizedValue, ResourceKey, UpstreamTarget},
};

/// Result of one fetch, after any retries.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub result: Result<NormalizedValue, FetchError>,
    /// Wall time spent inside [`Fetcher::fetch`], including backoff.
    pub latency: Duration,
    /// Network attempts made. Zero for skipped fetches.
    pub attempts: u32,
}

impl FetchOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self { result: Err(FetchError::Skipped(reason)), latency: Duration::ZERO, attempts: 0 }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// # Errors
    ///
    /// Returns the fetch error if the fetch did not produce a value.
    pub fn into_result(self) -> Result<NormalizedValue, FetchError> {
        self.result
    }
}

/// Performs the network call for one `(target, resource)` pair.
///
/// Consults the circuit breaker and rate limiter first and makes no network call if either
/// denies. Otherwise sends the request built by the target's normalizer, retrying transient
/// failures sequentially under the [`RetryPolicy`], and parses the body.
///
/// The fetcher never records outcomes into the breaker or cache; callers apply the returned
/// [`FetchOutcome`].
pub struct Fetcher {
    http: Arc<HttpClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl Fetcher {
    #[must_use]
    pub fn new(
        http: Arc<HttpClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { http, breakers, limiter, retry, metrics }
    }

    pub async fn fetch(&self, target: &UpstreamTarget, key: &ResourceKey) -> FetchOutcome {
        let normalizer = normalizer_for(&target.kind);
        let request = match normalizer.build_request(target, key) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    upstream = %target.id,
                    resource = %key,
                    error = %e,
                    "cannot build upstream request"
                );
                return FetchOutcome { result: Err(e), latency: Duration::ZERO, attempts: 0 };
            }
        };

        if !self.breakers.should_attempt(&target.id) {
            tracing::debug!(
                upstream = %target.id,
                resource = %key,
                "fetch skipped, circuit breaker open"
            );
            let outcome = FetchOutcome::skipped(SkipReason::CircuitOpen);
            self.record_error(target, outcome.result.as_ref().err());
            return outcome;
        }

        let allowed = self.limiter.allow(&target.id);
        self.metrics.record_rate_limit(
            &target.id,
            allowed,
            self.limiter.tokens_remaining(&target.id).unwrap_or(0.0),
        );
        if !allowed {
            self.breakers.release_probe(&target.id);
            tracing::debug!(upstream = %target.id, resource = %key, "fetch skipped, rate limited");
            let outcome = FetchOutcome::skipped(SkipReason::RateLimited);
            self.record_error(target, outcome.result.as_ref().err());
            return outcome;
        }

        let start = Instant::now();
        let (result, attempts) = self.fetch_with_retry(target, key, normalizer, &request).await;
        let latency = start.elapsed();

        if attempts == 0 {
            // Local congestion says nothing about the upstream
            self.breakers.release_probe(&target.id);
            tracing::debug!(
                upstream = %target.id,
                resource = %key,
                "fetch skipped, no http client permit available"
            );
            self.record_error(target, result.as_ref().err());
            return FetchOutcome { result, latency, attempts };
        }

        self.metrics.record_fetch(&target.id, key.as_label(), result.is_ok(), latency);
        match &result {
            Ok(_) => {
                tracing::debug!(
                    upstream = %target.id,
                    resource = %key,
                    attempts = attempts,
                    latency_ms = latency.as_millis(),
                    "fetch succeeded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    upstream = %target.id,
                    resource = %key,
                    attempts = attempts,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "fetch failed"
                );
                self.record_error(target, Some(e));
            }
        }

        FetchOutcome { result, latency, attempts }
    }

    /// Runs attempts strictly one after another until success or a non-retryable error.
    async fn fetch_with_retry(
        &self,
        target: &UpstreamTarget,
        key: &ResourceKey,
        normalizer: &dyn ResponseNormalizer,
        request: &UpstreamRequest,
    ) -> (Result<NormalizedValue, FetchError>, u32) {
        let mut attempt = 0u32;
        let mut last_error: Option<FetchError> = None;

        loop {
            attempt += 1;

            // The client enforces the request timeout; permit wait has its own bound
            let result = match self.http.send(request, target.timeout).await {
                Ok(body) => normalizer.normalize(target, key, &body),
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(value) => return (Ok(value), attempt),
                // No slot to send from: this attempt never happened
                Err(FetchError::Skipped(reason)) => {
                    return match last_error {
                        Some(previous) => (Err(previous), attempt - 1),
                        None => (Err(FetchError::Skipped(reason)), 0),
                    };
                }
                Err(e) => e,
            };

            if error.is_rate_limited() {
                self.limiter.throttle(&target.id);
                self.metrics.record_rate_limit_throttle(&target.id);
            }

            if !self.retry.should_retry(attempt, &error) {
                return (Err(error), attempt);
            }

            let delay = self.retry.delay_for(attempt, &mut rand::rng());
            tracing::debug!(
                upstream = %target.id,
                attempt = attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "retrying transient fetch failure"
            );
            self.metrics.record_retry_attempt(&target.id, attempt, delay);
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }

    fn record_error(&self, target: &UpstreamTarget, error: Option<&FetchError>) {
        if let Some(error) = error {
            self.metrics.record_fetch_error(&target.id, error);
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

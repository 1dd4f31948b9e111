//! Concurrent fan-out over every upstream relevant to a request.
//!
//! # Flow
//!
//! 1. [`EndpointRegistry::targets_for`] pairs each relevant upstream with each requested key.
//! 2. Every pair is fetched in its own tokio task. The task applies the outcome to the cache
//!    and circuit breaker through [`OutcomeRecorder`], then reports over an mpsc channel.
//! 3. The aggregator collects reports until all pairs have answered or the wall-clock budget
//!    expires. Pending tasks are abandoned, not cancelled: they keep running and still record
//!    their outcome, but the snapshot no longer waits for them.
//! 4. Each pair without a live value falls back to the cache (`source = cache`, with the live
//!    error attached). Pairs with neither are omitted and only their error is reported.
//!
//! A failing upstream never fails the whole request. The only distinguished failure is a
//! snapshot with nothing in it, reported as [`Completeness::Empty`].

pub mod outcome;

pub use outcome::OutcomeRecorder;

use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{
    cache::SnapshotCache,
    metrics::MetricsCollector,
    types::{
        parse_resource_keys, Completeness, DataSource, MarketSnapshot, NormalizedValue,
        ResourceKey, ResourceKeyError, SnapshotField, UpstreamResult, UpstreamTarget,
    },
    upstream::{errors::FetchError, fetcher::Fetcher, registry::EndpointRegistry},
    utils::clock::SharedClock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Time after which pending fetches are abandoned and the snapshot is returned.
    pub wall_clock_budget: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { wall_clock_budget: Duration::from_secs(8) }
    }
}

/// Message sent by a fetch task once its outcome has been recorded.
struct FetchReport {
    upstream_id: Arc<str>,
    key: ResourceKey,
    result: Result<(NormalizedValue, DateTime<Utc>), FetchError>,
}

pub struct Aggregator {
    registry: Arc<EndpointRegistry>,
    fetcher: Arc<Fetcher>,
    recorder: OutcomeRecorder,
    clock: SharedClock,
    metrics: Arc<MetricsCollector>,
    config: AggregatorConfig,
}

impl Aggregator {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        fetcher: Arc<Fetcher>,
        recorder: OutcomeRecorder,
        clock: SharedClock,
        metrics: Arc<MetricsCollector>,
        config: AggregatorConfig,
    ) -> Self {
        Self { registry, fetcher, recorder, clock, metrics, config }
    }

    /// Parses wire-form keys and builds a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceKeyError`] if any key is malformed. No fetch is started in that case.
    pub async fn get_snapshot_from_wire<S: AsRef<str>>(
        &self,
        raw_keys: &[S],
    ) -> Result<MarketSnapshot, ResourceKeyError> {
        let keys = parse_resource_keys(raw_keys)?;
        Ok(self.get_snapshot(&keys).await)
    }

    /// Fetches every requested key from every upstream that serves it.
    ///
    /// Always returns within the wall-clock budget (plus scheduling slack).
    pub async fn get_snapshot(&self, keys: &[ResourceKey]) -> MarketSnapshot {
        let started = tokio::time::Instant::now();
        let deadline = started + self.config.wall_clock_budget;
        let pairs = self.registry.targets_for(keys);

        let mut live = self.collect(&pairs, deadline).await;

        let mut upstreams: std::collections::BTreeMap<String, UpstreamResult> =
            std::collections::BTreeMap::new();
        for (target, key) in &pairs {
            let entry = upstreams.entry(target.id.to_string()).or_default();
            let wire_key = key.to_string();

            match live.remove(&(Arc::clone(&target.id), key.clone())) {
                Some(Ok((value, fetched_at))) => {
                    entry.fields.insert(
                        wire_key,
                        SnapshotField {
                            upstream_id: target.id.to_string(),
                            value,
                            source: DataSource::Live,
                            fetched_at,
                            stale: false,
                            error: None,
                        },
                    );
                }
                Some(Err(error)) => self.fallback(entry, target, key, &error),
                None => self.fallback(entry, target, key, &FetchError::Timeout),
            }
        }

        let completeness = Self::completeness(&upstreams, pairs.len());
        let snapshot =
            MarketSnapshot { generated_at: self.clock.utc_now(), completeness, upstreams };

        self.metrics.record_snapshot(
            completeness,
            started.elapsed(),
            snapshot.live_count(),
            snapshot.cached_count(),
        );
        self.metrics.record_cache_entries(self.recorder.cache().len());

        tracing::debug!(
            requested = pairs.len(),
            live = snapshot.live_count(),
            cached = snapshot.cached_count(),
            completeness = ?completeness,
            elapsed_ms = started.elapsed().as_millis(),
            "snapshot assembled"
        );

        snapshot
    }

    /// Spawns one task per pair and gathers reports until done or the deadline passes.
    async fn collect(
        &self,
        pairs: &[(Arc<UpstreamTarget>, ResourceKey)],
        deadline: tokio::time::Instant,
    ) -> HashMap<(Arc<str>, ResourceKey), Result<(NormalizedValue, DateTime<Utc>), FetchError>>
    {
        let mut live = HashMap::with_capacity(pairs.len());
        if pairs.is_empty() {
            return live;
        }

        // Capacity covers every pair, so a send never waits on a departed receiver.
        let (tx, mut rx) = mpsc::channel::<FetchReport>(pairs.len());

        for (target, key) in pairs {
            let tx = tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let recorder = self.recorder.clone();
            let target = Arc::clone(target);
            let key = key.clone();

            tokio::spawn(async move {
                let outcome = fetcher.fetch(&target, &key).await;
                let fetched_at = recorder.apply(&target, &key, &outcome);

                let result = match (outcome.result, fetched_at) {
                    (Ok(value), Some(fetched_at)) => Ok((value, fetched_at)),
                    (Ok(_), None) => Err(FetchError::Parse("fetch result was not cached".into())),
                    (Err(e), _) => Err(e),
                };

                let report = FetchReport { upstream_id: Arc::clone(&target.id), key, result };
                if tx.send(report).await.is_err() {
                    tracing::debug!(
                        upstream = %target.id,
                        "late fetch result recorded after snapshot was returned"
                    );
                }
            });
        }
        drop(tx);

        while live.len() < pairs.len() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(report)) => {
                    live.insert((report.upstream_id, report.key), report.result);
                }
                Ok(None) => break,
                Err(_) => {
                    let abandoned = pairs.len() - live.len();
                    tracing::warn!(
                        abandoned = abandoned,
                        budget_ms = self.config.wall_clock_budget.as_millis(),
                        "wall-clock budget exhausted, abandoning pending fetches"
                    );
                    self.metrics.record_abandoned_fetches(abandoned);
                    break;
                }
            }
        }

        live
    }

    /// Serves the cached value for a failed pair, or omits the field if there is none.
    fn fallback(
        &self,
        entry: &mut UpstreamResult,
        target: &UpstreamTarget,
        key: &ResourceKey,
        error: &FetchError,
    ) {
        let wire_key = key.to_string();
        let report = error.report();
        entry.errors.insert(wire_key.clone(), report.clone());

        match self.recorder.cache().get(&target.id, key) {
            Some(cached) => {
                tracing::debug!(
                    upstream = %target.id,
                    resource = %key,
                    stale = cached.stale,
                    age_ms = cached.age.as_millis(),
                    "serving cached value"
                );
                self.metrics.record_cache_fallback(&target.id, key.as_label(), true);
                entry.fields.insert(
                    wire_key,
                    SnapshotField {
                        upstream_id: target.id.to_string(),
                        value: cached.value,
                        source: DataSource::Cache,
                        fetched_at: cached.fetched_at,
                        stale: cached.stale,
                        error: Some(report),
                    },
                );
            }
            None => {
                tracing::debug!(
                    upstream = %target.id,
                    resource = %key,
                    "no cached value, field omitted"
                );
                self.metrics.record_cache_fallback(&target.id, key.as_label(), false);
            }
        }
    }

    fn completeness(
        upstreams: &std::collections::BTreeMap<String, UpstreamResult>,
        requested: usize,
    ) -> Completeness {
        let fields = upstreams.values().flat_map(|r| r.fields.values());
        let (mut resolved, mut live) = (0usize, 0usize);
        for field in fields {
            resolved += 1;
            if field.source == DataSource::Live {
                live += 1;
            }
        }

        if resolved == 0 {
            Completeness::Empty
        } else if live == requested {
            Completeness::Complete
        } else {
            Completeness::Partial
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        self.recorder.cache()
    }

    #[must_use]
    pub fn config(&self) -> AggregatorConfig {
        self.config
    }
}

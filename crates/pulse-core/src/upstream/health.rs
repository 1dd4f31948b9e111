use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    errors::{FetchError, SkipReason},
    fetcher::Fetcher,
    registry::EndpointRegistry,
};
use crate::{
    aggregator::OutcomeRecorder,
    metrics::MetricsCollector,
    types::{HealthRecord, UpstreamTarget},
    utils::clock::SharedClock,
};

/// Probes every upstream on a fixed interval, independent of user traffic, and maintains the
/// status table.
///
/// Runs one long-lived task per upstream, each on its own timer, so a slow upstream only
/// delays its own row. The reporter is expected to be built on a [`Fetcher`] whose
/// [`HttpClient`](super::http_client::HttpClient) is not shared with the aggregator, so user
/// traffic and probing cannot starve each other.
pub struct HealthReporter {
    registry: Arc<EndpointRegistry>,
    fetcher: Arc<Fetcher>,
    recorder: OutcomeRecorder,
    table: DashMap<Arc<str>, HealthRecord>,
    clock: SharedClock,
    metrics: Arc<MetricsCollector>,
    check_interval: Duration,
}

impl HealthReporter {
    /// Creates the reporter with one unprobed row per registered upstream.
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        fetcher: Arc<Fetcher>,
        recorder: OutcomeRecorder,
        clock: SharedClock,
        metrics: Arc<MetricsCollector>,
        check_interval: Duration,
    ) -> Self {
        let table = registry
            .all()
            .iter()
            .map(|target| (Arc::clone(&target.id), HealthRecord::unprobed(target)))
            .collect();

        Self { registry, fetcher, recorder, table, clock, metrics, check_interval }
    }

    /// Spawns one probing task per upstream. Every task stops when `shutdown_rx` fires.
    ///
    /// The first probe of each upstream runs immediately.
    #[must_use]
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Vec<JoinHandle<()>> {
        self.registry
            .all()
            .iter()
            .map(|target| {
                let reporter = Arc::clone(self);
                let target = Arc::clone(target);
                let mut shutdown_rx = shutdown_rx.resubscribe();
                let check_interval = self.check_interval;

                tokio::spawn(async move {
                    let mut ticker = interval(check_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                reporter.probe_target(&target).await;
                            }
                            _ = shutdown_rx.recv() => {
                                debug!(upstream = %target.id, "health prober shutting down");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Probes one upstream right away and returns its updated row.
    ///
    /// Returns `None` for an unknown upstream id.
    pub async fn probe_once(&self, upstream_id: &str) -> Option<HealthRecord> {
        let target = Arc::clone(self.registry.get(upstream_id)?);
        Some(self.probe_target(&target).await)
    }

    /// Probes every upstream concurrently once.
    pub async fn probe_all(&self) -> Vec<HealthRecord> {
        let probes = self.registry.all().iter().map(|target| self.probe_target(target));
        futures::future::join_all(probes).await
    }

    async fn probe_target(&self, target: &UpstreamTarget) -> HealthRecord {
        let previous = self
            .table
            .get(&target.id)
            .map_or_else(|| HealthRecord::unprobed(target), |r| r.value().clone());

        let Some(key) = target.probe_resource() else {
            warn!(upstream = %target.id, "no probe resource configured, skipping health probe");
            let record = HealthRecord {
                last_checked_at: Some(self.clock.utc_now()),
                operational: false,
                last_error: Some(
                    FetchError::Parse("no probe resource configured".to_string()).report(),
                ),
                ..previous
            };
            self.table.insert(Arc::clone(&target.id), record.clone());
            return record;
        };

        let outcome = self.fetcher.fetch(target, &key).await;

        // Local budget exhaustion says nothing about the upstream, so the row is left as is.
        if let Err(FetchError::Skipped(
            reason @ (SkipReason::RateLimited | SkipReason::PoolExhausted),
        )) = &outcome.result
        {
            debug!(upstream = %target.id, reason = %reason, "health check not run this cycle");
            return previous;
        }

        self.recorder.apply(target, &key, &outcome);

        let operational = outcome.is_success();
        let latency_ms = (outcome.attempts > 0)
            .then(|| u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX));

        let (last_value_observed, last_error) = match outcome.result {
            Ok(value) => (Some(value), None),
            Err(e) => (previous.last_value_observed.clone(), Some(e.report())),
        };

        let record = HealthRecord {
            upstream_id: target.id.to_string(),
            display_name: target.display_name.clone(),
            kind: target.kind,
            operational,
            last_checked_at: Some(self.clock.utc_now()),
            latency_ms,
            last_value_observed,
            last_error,
            circuit_state: self.recorder.breakers().status(&target.id),
        };

        if operational != previous.operational {
            info!(
                upstream = %target.id,
                operational = operational,
                "upstream health changed"
            );
        }

        self.table.insert(Arc::clone(&target.id), record.clone());
        self.metrics.record_health_check(&target.id, operational, outcome.latency);
        self.metrics.record_healthy_upstream_count(self.operational_count());

        record
    }

    /// Current status table, sorted by upstream id.
    #[must_use]
    pub fn get_health_table(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> =
            self.table.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.upstream_id.cmp(&b.upstream_id));
        records
    }

    #[must_use]
    pub fn get(&self, upstream_id: &str) -> Option<HealthRecord> {
        self.table.get(upstream_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn operational_count(&self) -> usize {
        self.table.iter().filter(|entry| entry.operational).count()
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }
}

//! Runtime lifecycle management including background tasks and graceful shutdown.

use crate::{
    aggregator::Aggregator, config::AppConfig, metrics::MetricsCollector,
    upstream::{health::HealthReporter, registry::EndpointRegistry},
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::PulseRuntimeBuilder, PulseComponents};

/// Probers get this long to finish an in-flight probe after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Main runtime container managing component lifecycles and background tasks.
///
/// Shutdown is coordinated through a broadcast channel. [`shutdown`](Self::shutdown) signals
/// every background task and awaits it, and may be called any number of times.
pub struct PulseRuntime {
    components: PulseComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    health_tasks: Mutex<Vec<JoinHandle<()>>>,
    background_probing: bool,
    shutdown_initiated: Arc<AtomicBool>,
}

impl PulseRuntime {
    /// Creates a new builder for constructing a `PulseRuntime`.
    #[must_use]
    pub fn builder() -> PulseRuntimeBuilder {
        PulseRuntimeBuilder::new()
    }

    /// Called by `PulseRuntimeBuilder`; starts the health probers when enabled.
    pub(super) fn new(
        components: PulseComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        enable_health_reporter: bool,
    ) -> Self {
        let health_tasks = if enable_health_reporter {
            let handles =
                components.health_reporter().start_with_shutdown(shutdown_tx.subscribe());
            debug!(probers = handles.len(), "health reporter tasks started");
            handles
        } else {
            Vec::new()
        };

        Self {
            components,
            shutdown_tx,
            config,
            health_tasks: Mutex::new(health_tasks),
            background_probing: enable_health_reporter,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn components(&self) -> &PulseComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        self.components.aggregator()
    }

    #[must_use]
    pub fn health_reporter(&self) -> &Arc<HealthReporter> {
        self.components.health_reporter()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        self.components.registry()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.components.metrics_collector()
    }

    #[must_use]
    pub fn has_background_probing(&self) -> bool {
        self.background_probing
    }

    /// Useful for listening to shutdown signals in custom background tasks.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Initiates graceful shutdown of all background tasks.
    ///
    /// Broadcasts the shutdown signal and waits for each prober to exit, aborting any that are
    /// still busy after a grace period. Idempotent: later calls return immediately.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("initiating pulse runtime shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("no shutdown receivers registered");
        }

        let handles = std::mem::take(&mut *self.health_tasks.lock());
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => debug!("health prober cancelled"),
                Ok(Err(e)) => error!(error = %e, "health prober failed"),
                Err(_) => {
                    warn!("health prober did not stop within grace period, aborting");
                    abort.abort();
                }
            }
        }

        info!("pulse runtime shutdown complete");
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<PulseRuntime>;
    let _ = assert_sync::<PulseRuntime>;
};

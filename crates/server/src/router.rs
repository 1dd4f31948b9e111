use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pulse_core::{
    aggregator::Aggregator,
    metrics::MetricsCollector,
    runtime::PulseRuntime,
    types::{Completeness, MarketSnapshot, ResourceKeyError},
    upstream::health::HealthReporter,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, warn};

/// Shared handler state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub health_reporter: Arc<HealthReporter>,
    pub metrics: Arc<MetricsCollector>,
    pub metrics_enabled: bool,
}

impl AppState {
    #[must_use]
    pub fn from_runtime(runtime: &PulseRuntime) -> Self {
        Self {
            aggregator: Arc::clone(runtime.aggregator()),
            health_reporter: Arc::clone(runtime.health_reporter()),
            metrics: Arc::clone(runtime.metrics()),
            metrics_enabled: runtime.config().metrics.enabled,
        }
    }
}

/// Builds the public router.
///
/// `max_concurrent_requests` bounds in-flight snapshot requests; each one fans out to every
/// relevant upstream.
pub fn create_app(state: AppState, max_concurrent_requests: usize) -> Router {
    let data = Router::new()
        .route("/data/{resource}", get(handle_data))
        .route("/snapshot", get(handle_snapshot))
        .layer(ConcurrencyLimitLayer::new(max_concurrent_requests))
        .layer(CompressionLayer::new());

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/metrics", get(handle_metrics))
        .merge(data)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Comma-separated resource keys, e.g. `latest_block,floor_price:azuki`.
    pub keys: Option<String>,
}

/// Splits a comma-separated key list, dropping empty entries.
fn split_keys(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|k| !k.is_empty()).collect()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

/// An empty snapshot is 503 but still carries the per-upstream errors.
fn snapshot_response(result: Result<MarketSnapshot, ResourceKeyError>) -> Response {
    match result {
        Ok(snapshot) => {
            let status = if snapshot.completeness == Completeness::Empty {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (status, Json(snapshot)).into_response()
        }
        Err(e) => {
            debug!(error = %e, "rejected resource key");
            bad_request(e.to_string())
        }
    }
}

async fn snapshot_for(aggregator: &Aggregator, raw: &str) -> Response {
    let keys = split_keys(raw);
    if keys.is_empty() {
        return bad_request("at least one resource key is required".to_string());
    }
    snapshot_response(aggregator.get_snapshot_from_wire(&keys).await)
}

/// `GET /data/{resource}` where `resource` is one key or a comma-separated list.
pub async fn handle_data(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Response {
    snapshot_for(&state.aggregator, &resource).await
}

/// `GET /snapshot?keys=a,b`
pub async fn handle_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Response {
    match query.keys {
        Some(keys) => snapshot_for(&state.aggregator, &keys).await,
        None => bad_request("missing `keys` query parameter".to_string()),
    }
}

/// `GET /status`: the health table, sorted by upstream id.
#[allow(clippy::unused_async)]
pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health_reporter.get_health_table())
}

/// Liveness only; upstream health lives under `/status`.
#[allow(clippy::unused_async)]
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let table = state.health_reporter.get_health_table();

    Json(serde_json::json!({
        "status": "ok",
        "upstreams": {
            "total": table.len(),
            "operational": table.iter().filter(|r| r.operational).count(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[allow(clippy::unused_async)]
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    if !state.metrics_enabled {
        warn!("metrics endpoint requested while metrics are disabled");
        return StatusCode::NOT_FOUND.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.get_prometheus_metrics(),
    )
        .into_response()
}

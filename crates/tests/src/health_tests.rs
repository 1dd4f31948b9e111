//! Health reporter behavior: independence from user traffic and shared breaker state.

use crate::mock_infrastructure::*;
use pulse_core::{
    runtime::PulseRuntime,
    types::{MarketplaceApi, NormalizedValue, ResourceKey},
    upstream::{circuit_breaker::CircuitStatus, errors::FetchErrorKind},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[tokio::test]
async fn test_probe_succeeds_while_aggregator_pool_is_saturated() {
    let slow = ScriptedUpstream::start(
        vec![],
        ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":1,"id":1}"#)
            .with_delay(Duration::from_millis(1500)),
    )
    .await;
    let mut opensea = UpstreamMockBuilder::new().await;
    opensea.mock_opensea_stats("pudgypenguins", 11.2).await;

    let mut slow_entry = solana_entry("slow_chain", &slow.url());
    slow_entry.timeout_ms = Some(2000);
    let mut config = test_config(vec![
        slow_entry,
        marketplace_entry("opensea", MarketplaceApi::OpenSea, &opensea.url(), "pudgypenguins"),
    ]);
    config.aggregator.concurrency_limit = 1;
    let runtime = build_runtime(config);

    // Occupy the aggregator's only permit
    let aggregator = Arc::clone(runtime.aggregator());
    let pending =
        tokio::spawn(async move { aggregator.get_snapshot(&[ResourceKey::LatestBlock]).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pending.is_finished());

    let started = Instant::now();
    let record = runtime.health_reporter().probe_once("opensea").await.unwrap();

    assert!(record.operational, "probe failed: {:?}", record.last_error);
    assert!(started.elapsed() < Duration::from_millis(500));
    match record.last_value_observed {
        Some(NormalizedValue::FloorPrice { collection, .. }) => {
            assert_eq!(collection, "pudgypenguins");
        }
        other => panic!("unexpected probe value {other:?}"),
    }

    let snapshot = pending.await.unwrap();
    assert_eq!(snapshot.live_count(), 1);
}

#[tokio::test]
async fn test_probe_failures_trip_breaker_shared_with_aggregator() {
    let mut config = test_config(vec![solana_entry("solana", UNREACHABLE_URL)]);
    config.circuit_breaker.failure_threshold = 1;
    let runtime = build_runtime(config);

    let record = runtime.health_reporter().probe_once("solana").await.unwrap();
    assert!(!record.operational);
    assert!(record.last_checked_at.is_some());
    assert_eq!(record.last_error.unwrap().kind, FetchErrorKind::TransportError);
    assert_eq!(record.circuit_state, CircuitStatus::Open);

    let snapshot = runtime.aggregator().get_snapshot(&[ResourceKey::LatestBlock]).await;
    assert_eq!(snapshot.upstreams["solana"].errors["latest_block"].kind, FetchErrorKind::Skipped);
}

#[tokio::test]
async fn test_successful_probe_seeds_cache_for_snapshots() {
    let upstream = ScriptedUpstream::start(
        vec![ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":900,"id":1}"#)],
        ScriptedResponse::status(500),
    )
    .await;
    let runtime = build_runtime(test_config(vec![solana_entry("solana", &upstream.url())]));

    assert!(runtime.health_reporter().probe_once("solana").await.unwrap().operational);

    let snapshot = runtime.aggregator().get_snapshot(&[ResourceKey::LatestBlock]).await;
    let field = snapshot.field("solana", &ResourceKey::LatestBlock).unwrap();
    assert_eq!(field.value, NormalizedValue::ChainHead { chain_id: 101, block_number: 900 });
    assert_eq!(field.error.as_ref().unwrap().kind, FetchErrorKind::UpstreamError);
}

#[tokio::test]
async fn test_health_row_kept_when_user_traffic_drains_the_allowance() {
    let upstream = ScriptedUpstream::start(
        vec![],
        ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":77,"id":1}"#),
    )
    .await;
    let mut entry = solana_entry("solana", &upstream.url());
    entry.rate_limit_per_minute = 3;
    let runtime = build_runtime(test_config(vec![entry]));
    let reporter = runtime.health_reporter();

    let checked = reporter.probe_once("solana").await.unwrap();
    assert!(checked.operational);

    for _ in 0..2 {
        let snapshot = runtime.aggregator().get_snapshot(&[ResourceKey::LatestBlock]).await;
        assert_eq!(snapshot.live_count(), 1);
    }

    let record = reporter.probe_once("solana").await.unwrap();
    assert!(record.operational);
    assert_eq!(record.last_checked_at, checked.last_checked_at);
    assert_eq!(
        record.last_value_observed,
        Some(NormalizedValue::ChainHead { chain_id: 101, block_number: 77 })
    );
    assert!(record.last_error.is_none());
    assert_eq!(record.circuit_state, CircuitStatus::Closed);
    assert_eq!(reporter.operational_count(), 1);
    assert_eq!(upstream.hits(), 3);

    let snapshot = runtime.aggregator().get_snapshot(&[ResourceKey::LatestBlock]).await;
    assert_eq!(snapshot.upstreams["solana"].errors["latest_block"].kind, FetchErrorKind::Skipped);
}

#[tokio::test]
async fn test_background_reporter_populates_table_and_stops() {
    let mut eth = UpstreamMockBuilder::new().await;
    eth.mock_evm_head(1, 19_000_001).await;
    let mut opensea = UpstreamMockBuilder::new().await;
    opensea.mock_opensea_stats("azuki", 4.2).await;

    let runtime = PulseRuntime::builder()
        .with_config(test_config(vec![
            evm_entry("ethereum", 1, &eth.url()),
            marketplace_entry("opensea", MarketplaceApi::OpenSea, &opensea.url(), "azuki"),
            solana_entry("solana", UNREACHABLE_URL),
        ]))
        .enable_health_reporter()
        .build()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while runtime.health_reporter().get_health_table().iter().any(|r| r.last_checked_at.is_none())
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let table = runtime.health_reporter().get_health_table();
    let ids: Vec<&str> = table.iter().map(|r| r.upstream_id.as_str()).collect();
    assert_eq!(ids, vec!["ethereum", "opensea", "solana"]);
    assert!(table[0].operational);
    assert!(table[1].operational);
    assert!(!table[2].operational);
    assert!(table[0].latency_ms.is_some());
    assert_eq!(runtime.health_reporter().operational_count(), 2);

    tokio::time::timeout(Duration::from_secs(6), runtime.shutdown())
        .await
        .expect("shutdown completes");
}

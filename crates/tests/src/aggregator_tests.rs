//! Snapshot assembly across many upstreams: live data, cache fallback, omission, and the
//! wall-clock budget.

use crate::mock_infrastructure::*;
use pulse_core::{
    types::{Completeness, DataSource, MarketplaceApi, NormalizedValue, ResourceKey},
    upstream::{circuit_breaker::CircuitStatus, errors::FetchErrorKind},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[tokio::test]
async fn test_all_healthy_upstreams_return_live_data() {
    let mut eth = UpstreamMockBuilder::new().await;
    eth.mock_evm_head(1, 19_000_000).await;
    let mut base = UpstreamMockBuilder::new().await;
    base.mock_evm_head(8453, 12_500_000).await;
    let mut sol = UpstreamMockBuilder::new().await;
    sol.mock_solana_slot(250_000_000).await;
    let mut opensea = UpstreamMockBuilder::new().await;
    opensea.mock_opensea_stats("azuki", 5.5).await;
    let mut reservoir = UpstreamMockBuilder::new().await;
    reservoir.mock_reservoir_collection("azuki", "Azuki", 5.4).await;

    let runtime = build_runtime(test_config(vec![
        evm_entry("ethereum", 1, &eth.url()),
        evm_entry("base", 8453, &base.url()),
        solana_entry("solana", &sol.url()),
        marketplace_entry("opensea", MarketplaceApi::OpenSea, &opensea.url(), "azuki"),
        marketplace_entry("reservoir", MarketplaceApi::Reservoir, &reservoir.url(), "azuki"),
    ]));
    let budget = runtime.aggregator().config().wall_clock_budget;

    let started = Instant::now();
    let snapshot = runtime
        .aggregator()
        .get_snapshot_from_wire(&["latest_block", "floor_price:azuki"])
        .await
        .unwrap();

    assert!(started.elapsed() < budget);
    assert_eq!(snapshot.completeness, Completeness::Complete);
    assert_eq!(snapshot.live_count(), 5);
    assert_eq!(snapshot.cached_count(), 0);

    for id in ["ethereum", "base", "solana"] {
        assert_eq!(field_source(&snapshot, id, &ResourceKey::LatestBlock), Some(DataSource::Live));
    }
    for id in ["opensea", "reservoir"] {
        assert_eq!(field_source(&snapshot, id, &floor("azuki")), Some(DataSource::Live));
    }

    let sources = snapshot.sources();
    assert_eq!(sources.len(), 5);
    assert_eq!(sources["base/latest_block"], ("base".to_string(), DataSource::Live));

    assert_eq!(
        snapshot.field("base", &ResourceKey::LatestBlock).unwrap().value,
        NormalizedValue::ChainHead { chain_id: 8453, block_number: 12_500_000 }
    );
    match &snapshot.field("reservoir", &floor("azuki")).unwrap().value {
        NormalizedValue::FloorPrice { floor_price, metadata, .. } => {
            assert!((floor_price - 5.4).abs() < f64::EPSILON);
            assert_eq!(metadata.name.as_deref(), Some("Azuki"));
        }
        other => panic!("unexpected value {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_upstream_served_from_cache_without_affecting_others() {
    let mut eth = UpstreamMockBuilder::new().await;
    eth.mock_evm_head(1, 100).await;
    let mut arbitrum = UpstreamMockBuilder::new().await;
    arbitrum.mock_evm_head(42161, 200).await;
    let mut polygon = UpstreamMockBuilder::new().await;
    polygon.mock_status("POST", 500).await;

    let runtime = build_runtime(test_config(vec![
        evm_entry("ethereum", 1, &eth.url()),
        evm_entry("arbitrum", 42161, &arbitrum.url()),
        evm_entry("polygon", 137, &polygon.url()),
    ]));
    let keys = [ResourceKey::LatestBlock];

    let first = runtime.aggregator().get_snapshot(&keys).await;
    let cached_at = first.field("arbitrum", &ResourceKey::LatestBlock).unwrap().fetched_at;
    assert_eq!(first.completeness, Completeness::Partial);

    arbitrum.reset().await;
    arbitrum.mock_status("POST", 503).await;

    let second = runtime.aggregator().get_snapshot(&keys).await;

    // Healthy upstream stays live
    assert_eq!(field_source(&second, "ethereum", &keys[0]), Some(DataSource::Live));

    // Previously healthy upstream falls back to its last good value
    let fallback = second.field("arbitrum", &keys[0]).unwrap();
    assert_eq!(fallback.source, DataSource::Cache);
    assert_eq!(fallback.fetched_at, cached_at);
    assert_eq!(fallback.value, NormalizedValue::ChainHead { chain_id: 42161, block_number: 200 });
    let error = fallback.error.as_ref().unwrap();
    assert_eq!(error.kind, FetchErrorKind::UpstreamError);
    assert_eq!(error.status, Some(503));

    // Never-successful upstream is omitted but its error is reported
    assert!(second.field("polygon", &keys[0]).is_none());
    assert_eq!(
        second.upstreams["polygon"].errors["latest_block"].kind,
        FetchErrorKind::UpstreamError
    );

    assert_eq!(second.completeness, Completeness::Partial);
    assert_eq!(second.live_count(), 1);
    assert_eq!(second.cached_count(), 1);
}

#[tokio::test]
async fn test_nine_chains_with_one_refusing_connections() {
    let chains: [(&str, u64); 8] = [
        ("ethereum", 1),
        ("optimism", 10),
        ("bsc", 56),
        ("polygon", 137),
        ("fantom", 250),
        ("base", 8453),
        ("arbitrum", 42161),
        ("avalanche", 43114),
    ];

    let mut mocks = Vec::new();
    let mut entries = Vec::new();
    for (id, chain_id) in chains {
        let mut mock = UpstreamMockBuilder::new().await;
        mock.mock_evm_head(chain_id, 1_000 + chain_id).await;
        entries.push(evm_entry(id, chain_id, &mock.url()));
        mocks.push(mock);
    }
    entries.push(evm_entry("zksync", 324, UNREACHABLE_URL));

    let runtime = build_runtime(test_config(entries));
    let budget = runtime.aggregator().config().wall_clock_budget;

    let started = Instant::now();
    let snapshot = runtime.aggregator().get_snapshot_from_wire(&["latest_block"]).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < budget);
    assert!(elapsed < Duration::from_secs(2), "dead endpoint held the snapshot: {elapsed:?}");

    assert_eq!(snapshot.live_count(), 8);
    assert_eq!(snapshot.completeness, Completeness::Partial);
    for (id, _) in chains {
        assert_eq!(field_source(&snapshot, id, &ResourceKey::LatestBlock), Some(DataSource::Live));
    }
    assert!(snapshot.field("zksync", &ResourceKey::LatestBlock).is_none());
    assert_eq!(
        snapshot.upstreams["zksync"].errors["latest_block"].kind,
        FetchErrorKind::TransportError
    );
}

#[tokio::test]
async fn test_all_down_without_cache_is_empty() {
    let runtime = build_runtime(test_config(vec![
        evm_entry("ethereum", 1, UNREACHABLE_URL),
        solana_entry("solana", UNREACHABLE_URL),
    ]));

    let snapshot = runtime.aggregator().get_snapshot_from_wire(&["latest_block"]).await.unwrap();

    assert_eq!(snapshot.completeness, Completeness::Empty);
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.upstreams.len(), 2);
    assert!(snapshot.upstreams.values().all(|r| r.errors.contains_key("latest_block")));
}

#[tokio::test]
async fn test_irrelevant_keys_produce_empty_snapshot() {
    let mut eth = UpstreamMockBuilder::new().await;
    eth.mock_evm_head(1, 1).await;
    let runtime = build_runtime(test_config(vec![evm_entry("ethereum", 1, &eth.url())]));

    let snapshot = runtime.aggregator().get_snapshot(&[floor("azuki")]).await;

    assert_eq!(snapshot.completeness, Completeness::Empty);
    assert!(snapshot.upstreams.is_empty());
}

#[tokio::test]
async fn test_invalid_wire_key_starts_no_fetch() {
    let mut eth = UpstreamMockBuilder::new().await;
    let untouched = eth
        .get_server()
        .mock("POST", "/")
        .expect(0)
        .create_async()
        .await;
    let runtime = build_runtime(test_config(vec![evm_entry("ethereum", 1, &eth.url())]));

    let result =
        runtime.aggregator().get_snapshot_from_wire(&["latest_block", "floor_price:"]).await;

    assert!(result.is_err());
    untouched.assert_async().await;
}

#[tokio::test]
async fn test_abandoned_fetch_still_updates_cache() {
    let slow = ScriptedUpstream::start(
        vec![ScriptedResponse::status(500).with_delay(Duration::from_millis(300))],
        ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":42,"id":1}"#)
            .with_delay(Duration::from_millis(300)),
    )
    .await;

    let mut entry = solana_entry("solana", &slow.url());
    entry.timeout_ms = Some(400);
    let mut config = test_config(vec![entry]);
    config.aggregator.wall_clock_budget_ms = 500;
    let runtime = build_runtime(config);

    let started = Instant::now();
    let snapshot = runtime.aggregator().get_snapshot(&[ResourceKey::LatestBlock]).await;

    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(snapshot.completeness, Completeness::Empty);
    assert_eq!(snapshot.upstreams["solana"].errors["latest_block"].kind, FetchErrorKind::Timeout);

    // The retry lands after the snapshot was returned and is still recorded
    let deadline = Instant::now() + Duration::from_secs(3);
    while runtime.aggregator().cache().get("solana", &ResourceKey::LatestBlock).is_none()
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let cached = runtime.aggregator().cache().get("solana", &ResourceKey::LatestBlock).unwrap();
    assert_eq!(cached.value, NormalizedValue::ChainHead { chain_id: 101, block_number: 42 });
    assert_eq!(slow.hits(), 2);
}

#[tokio::test]
async fn test_local_pool_congestion_leaves_other_breakers_closed() {
    let slow = ScriptedUpstream::start(
        vec![],
        ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":77,"id":1}"#)
            .with_delay(Duration::from_millis(1500)),
    )
    .await;
    let fast = ScriptedUpstream::start(
        vec![],
        ScriptedResponse::ok(r#"{"total":{"floor_price":6.1,"floor_price_symbol":"ETH"}}"#),
    )
    .await;

    let mut slow_entry = solana_entry("a_slow", &slow.url());
    slow_entry.timeout_ms = Some(2000);
    let mut config = test_config(vec![
        slow_entry,
        marketplace_entry("b_fast", MarketplaceApi::OpenSea, &fast.url(), "azuki"),
    ]);
    config.aggregator.concurrency_limit = 1;
    config.circuit_breaker.failure_threshold = 1;
    let runtime = build_runtime(config);

    // The slow chain holds the only connection slot
    let aggregator = Arc::clone(runtime.aggregator());
    let pending =
        tokio::spawn(async move { aggregator.get_snapshot(&[ResourceKey::LatestBlock]).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let congested = runtime.aggregator().get_snapshot(&[floor("azuki")]).await;

    assert_eq!(
        congested.upstreams["b_fast"].errors["floor_price:azuki"].kind,
        FetchErrorKind::Skipped
    );
    assert_eq!(fast.hits(), 0);
    let breakers = runtime.components().breakers();
    assert_eq!(breakers.status("b_fast"), CircuitStatus::Closed);
    assert_eq!(breakers.failure_count("b_fast"), 0);

    assert_eq!(pending.await.unwrap().live_count(), 1);

    let recovered = runtime.aggregator().get_snapshot(&[floor("azuki")]).await;
    assert_eq!(field_source(&recovered, "b_fast", &floor("azuki")), Some(DataSource::Live));
    assert_eq!(fast.hits(), 1);
}

#[tokio::test]
async fn test_duplicate_keys_fetch_once_and_stay_live() {
    let upstream = ScriptedUpstream::start(
        vec![],
        ScriptedResponse::ok(r#"{"jsonrpc":"2.0","result":555,"id":1}"#),
    )
    .await;
    let runtime = build_runtime(test_config(vec![solana_entry("solana", &upstream.url())]));

    let keys = [ResourceKey::LatestBlock, ResourceKey::LatestBlock];
    let snapshot = runtime.aggregator().get_snapshot(&keys).await;

    assert_eq!(snapshot.completeness, Completeness::Complete);
    assert_eq!(snapshot.live_count(), 1);
    assert!(snapshot.upstreams["solana"].errors.is_empty());
    assert_eq!(upstream.hits(), 1);
}

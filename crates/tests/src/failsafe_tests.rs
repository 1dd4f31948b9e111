//! Circuit breaker behavior as seen through the aggregator.

use crate::mock_infrastructure::*;
use pulse_core::{
    runtime::PulseRuntime,
    types::{Completeness, DataSource, ResourceKey},
    upstream::{circuit_breaker::CircuitStatus, errors::FetchErrorKind},
    utils::clock::{ManualClock, SharedClock},
};
use std::{sync::Arc, time::Duration};

const SOLANA_SLOT: &str = r#"{"jsonrpc":"2.0","result":123456,"id":1}"#;

#[tokio::test]
async fn test_breaker_opens_skips_and_recovers() {
    let mut upstream = UpstreamMockBuilder::new().await;
    let failing = upstream
        .get_server()
        .mock("POST", "/")
        .with_status(500)
        .expect(4)
        .create_async()
        .await;

    let mut config = test_config(vec![solana_entry("solana", &upstream.url())]);
    config.circuit_breaker.failure_threshold = 2;
    let clock = Arc::new(ManualClock::new());
    let runtime = PulseRuntime::builder()
        .with_config(config)
        .with_clock(Arc::clone(&clock) as SharedClock)
        .build()
        .unwrap();
    let breakers = runtime.components().breakers();
    let keys = [ResourceKey::LatestBlock];

    // One failure per fetch, however many attempts it made
    runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(breakers.failure_count("solana"), 1);
    assert_eq!(breakers.status("solana"), CircuitStatus::Closed);

    runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(breakers.status("solana"), CircuitStatus::Open);

    // Open breaker: no network call at all
    let skipped = runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(skipped.upstreams["solana"].errors["latest_block"].kind, FetchErrorKind::Skipped);
    failing.assert_async().await;

    upstream.reset().await;
    upstream.mock_solana_slot(123_456).await;
    clock.advance(Duration::from_secs(31));

    let recovered = runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(recovered.completeness, Completeness::Complete);
    assert_eq!(field_source(&recovered, "solana", &keys[0]), Some(DataSource::Live));
    assert_eq!(breakers.status("solana"), CircuitStatus::Closed);
    assert_eq!(breakers.failure_count("solana"), 0);
}

#[tokio::test]
async fn test_failed_recovery_probe_reopens() {
    let upstream = ScriptedUpstream::start(vec![], ScriptedResponse::status(502)).await;

    let mut config = test_config(vec![solana_entry("solana", &upstream.url())]);
    config.circuit_breaker.failure_threshold = 1;
    config.fetcher.retry.max_attempts = 1;
    let clock = Arc::new(ManualClock::new());
    let runtime = PulseRuntime::builder()
        .with_config(config)
        .with_clock(Arc::clone(&clock) as SharedClock)
        .build()
        .unwrap();
    let breakers = runtime.components().breakers();
    let keys = [ResourceKey::LatestBlock];

    runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(breakers.status("solana"), CircuitStatus::Open);
    assert_eq!(upstream.hits(), 1);

    clock.advance(Duration::from_secs(31));
    runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(upstream.hits(), 2, "exactly one probe after the recovery interval");
    assert_eq!(breakers.status("solana"), CircuitStatus::Open);

    runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(upstream.hits(), 2, "re-opened breaker waits a full interval again");
}

#[tokio::test]
async fn test_parse_errors_count_as_failures_and_are_never_cached() {
    let upstream = ScriptedUpstream::start(
        vec![ScriptedResponse::ok(SOLANA_SLOT)],
        ScriptedResponse::ok(r#"{"unexpected":"shape"}"#),
    )
    .await;

    let runtime = build_runtime(test_config(vec![solana_entry("solana", &upstream.url())]));
    let keys = [ResourceKey::LatestBlock];

    let first = runtime.aggregator().get_snapshot(&keys).await;
    assert_eq!(field_source(&first, "solana", &keys[0]), Some(DataSource::Live));

    let second = runtime.aggregator().get_snapshot(&keys).await;
    let field = second.field("solana", &keys[0]).unwrap();
    assert_eq!(field.source, DataSource::Cache);
    assert_eq!(field.error.as_ref().unwrap().kind, FetchErrorKind::ParseError);
    assert_eq!(runtime.components().breakers().failure_count("solana"), 1);

    // Parse errors are not retried
    assert_eq!(upstream.hits(), 2);
}

//! Configuration loading through the runtime.

use crate::mock_infrastructure::*;
use pulse_core::{config::AppConfig, runtime::PulseRuntime, types::Completeness};
use serial_test::serial;
use std::{fs, path::PathBuf};

fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pulse-{}-{name}.toml", std::process::id()));
    fs::write(&path, contents).expect("write temp config");
    path
}

#[tokio::test]
#[serial]
async fn test_runtime_from_toml_file() {
    let mut sol = UpstreamMockBuilder::new().await;
    sol.mock_solana_slot(31_337).await;

    let path = write_config(
        "file",
        &format!(
            r#"
[aggregator]
wall_clock_budget_ms = 4000

[circuit_breaker]
failure_threshold = 3

[[upstreams]]
id = "solana"
display_name = "Solana Mainnet"
kind = "chain"
protocol = "solana"
chain_id = 101
base_url = "{}"
timeout_ms = 1000
rate_limit_per_minute = 120
"#,
            sol.url()
        ),
    );

    let config = AppConfig::from_file(&path).unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(config.aggregator.wall_clock_budget_ms, 4000);
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.fetcher.default_timeout_ms, 5000);

    let runtime = PulseRuntime::builder().with_config(config).build().unwrap();
    assert_eq!(runtime.components().breakers().config().failure_threshold, 3);
    assert_eq!(runtime.health_reporter().get_health_table()[0].display_name, "Solana Mainnet");

    let snapshot = runtime.aggregator().get_snapshot_from_wire(&["latest_block"]).await.unwrap();
    assert_eq!(snapshot.completeness, Completeness::Complete);

    runtime.shutdown().await;
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let path = write_config(
        "env",
        r#"
[server]
bind_port = 4000

[aggregator]
wall_clock_budget_ms = 4000
"#,
    );

    std::env::set_var("PULSE__SERVER__BIND_PORT", "5050");
    std::env::set_var("PULSE__AGGREGATOR__WALL_CLOCK_BUDGET_MS", "6000");
    let config = AppConfig::from_file(&path);
    std::env::remove_var("PULSE__SERVER__BIND_PORT");
    std::env::remove_var("PULSE__AGGREGATOR__WALL_CLOCK_BUDGET_MS");
    fs::remove_file(&path).ok();

    let config = config.unwrap();
    assert_eq!(config.server.bind_port, 5050);
    assert_eq!(config.aggregator.wall_clock_budget_ms, 6000);
}

#[test]
#[serial]
fn test_auth_token_resolved_from_environment() {
    let mut entry = marketplace_entry(
        "opensea",
        pulse_core::types::MarketplaceApi::OpenSea,
        "https://api.opensea.io",
        "azuki",
    );
    entry.auth_token_env = Some("PULSE_TEST_OPENSEA_KEY".to_string());
    let config = test_config(vec![entry]);

    std::env::set_var("PULSE_TEST_OPENSEA_KEY", "secret-key");
    let targets = config.to_targets();
    std::env::remove_var("PULSE_TEST_OPENSEA_KEY");

    assert_eq!(targets.unwrap()[0].auth_token.as_deref(), Some("secret-key"));
    assert!(config.to_targets().is_err());
}

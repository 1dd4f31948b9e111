//! Config and runtime builders shared by the integration tests.

use pulse_core::{
    config::{AppConfig, UpstreamEntry, UpstreamKindName},
    runtime::PulseRuntime,
    types::{ChainProtocol, DataSource, MarketSnapshot, MarketplaceApi, ResourceKey},
};

/// Nothing listens on port 1, so connections are refused immediately.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

fn base_entry(id: &str, kind: UpstreamKindName, base_url: &str) -> UpstreamEntry {
    UpstreamEntry {
        id: id.to_string(),
        display_name: None,
        kind,
        protocol: None,
        chain_id: None,
        api: None,
        base_url: base_url.to_string(),
        auth_token: None,
        auth_token_env: None,
        timeout_ms: Some(1000),
        rate_limit_per_minute: 600,
        cache_ttl_seconds: 30,
        probe_collection: None,
    }
}

#[must_use]
pub fn evm_entry(id: &str, chain_id: u64, base_url: &str) -> UpstreamEntry {
    UpstreamEntry {
        protocol: Some(ChainProtocol::Evm),
        chain_id: Some(chain_id),
        ..base_entry(id, UpstreamKindName::Chain, base_url)
    }
}

#[must_use]
pub fn solana_entry(id: &str, base_url: &str) -> UpstreamEntry {
    UpstreamEntry {
        protocol: Some(ChainProtocol::Solana),
        chain_id: Some(101),
        ..base_entry(id, UpstreamKindName::Chain, base_url)
    }
}

#[must_use]
pub fn marketplace_entry(
    id: &str,
    api: MarketplaceApi,
    base_url: &str,
    probe_collection: &str,
) -> UpstreamEntry {
    UpstreamEntry {
        api: Some(api),
        probe_collection: Some(probe_collection.to_string()),
        ..base_entry(id, UpstreamKindName::Marketplace, base_url)
    }
}

#[must_use]
pub fn test_config(upstreams: Vec<UpstreamEntry>) -> AppConfig {
    AppConfig { upstreams, ..Default::default() }
}

/// Builds a runtime without background probing.
///
/// # Panics
///
/// Panics if the config is invalid.
#[must_use]
pub fn build_runtime(config: AppConfig) -> PulseRuntime {
    PulseRuntime::builder().with_config(config).build().expect("valid test runtime")
}

#[must_use]
pub fn floor(collection: &str) -> ResourceKey {
    ResourceKey::FloorPrice { collection: collection.to_string() }
}

/// Source of one field, or `None` if the field was omitted.
#[must_use]
pub fn field_source(
    snapshot: &MarketSnapshot,
    upstream_id: &str,
    key: &ResourceKey,
) -> Option<DataSource> {
    snapshot.field(upstream_id, key).map(|field| field.source)
}

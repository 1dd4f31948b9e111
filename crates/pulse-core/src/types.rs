//! Core type definitions shared by every component of the aggregation layer.
//!
//! # Type Categories
//!
//! ## Upstream Identity
//! - [`UpstreamTarget`], [`UpstreamKind`]: one chain RPC endpoint or marketplace API, immutable
//!   after configuration load and shared as `Arc<UpstreamTarget>`
//!
//! ## Requests and Canonical Values
//! - [`ResourceKey`]: what a caller asks for (`latest_block`, `floor_price:<collection>`)
//! - [`NormalizedValue`]: the canonical shape every upstream response is converted into
//!
//! ## Aggregation Results
//! - [`MarketSnapshot`], [`UpstreamResult`], [`SnapshotField`]: per-request merged view with
//!   field-level source and freshness tags
//! - [`HealthRecord`]: per-upstream probe result published by the health reporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;

use crate::upstream::{circuit_breaker::CircuitStatus, errors::FetchErrorReport};

/// Wire protocol spoken by a chain RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainProtocol {
    /// Ethereum-compatible JSON-RPC (`eth_blockNumber`, `eth_chainId`).
    Evm,
    /// Solana JSON-RPC (`getSlot`).
    Solana,
}

/// Marketplace API family, each with its own response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceApi {
    OpenSea,
    MagicEden,
    Reservoir,
    LooksRare,
    Rarible,
}

/// Distinguishes chain RPC endpoints from marketplace APIs.
///
/// The variant selects the response normalizer at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamKind {
    Chain { protocol: ChainProtocol, chain_id: u64 },
    Marketplace { api: MarketplaceApi },
}

impl UpstreamKind {
    #[must_use]
    pub fn is_chain(&self) -> bool {
        matches!(self, Self::Chain { .. })
    }

    #[must_use]
    pub fn is_marketplace(&self) -> bool {
        matches!(self, Self::Marketplace { .. })
    }

    /// Static label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chain { .. } => "chain",
            Self::Marketplace { .. } => "marketplace",
        }
    }
}

/// One network or marketplace endpoint the aggregator depends on.
///
/// Created once at startup from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTarget {
    /// Stable identifier, unique across the registry (e.g. `"ethereum"`, `"opensea"`).
    pub id: Arc<str>,
    /// Human-readable network name shown in the status table.
    pub display_name: String,
    pub kind: UpstreamKind,
    pub base_url: String,
    /// API key or bearer token. Never logged.
    pub auth_token: Option<String>,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    pub rate_limit_per_minute: u32,
    /// Age after which a cached value from this upstream is reported as stale.
    pub cache_ttl: Duration,
    /// Collection used by the health reporter for marketplace probes.
    pub probe_collection: Option<String>,
}

impl UpstreamTarget {
    /// Returns `true` if this upstream can serve the given resource.
    #[must_use]
    pub fn serves(&self, key: &ResourceKey) -> bool {
        match key {
            ResourceKey::LatestBlock => self.kind.is_chain(),
            ResourceKey::FloorPrice { .. } => self.kind.is_marketplace(),
        }
    }

    /// The cheap canonical resource used for health probing.
    ///
    /// Returns `None` for a marketplace without a configured probe collection.
    #[must_use]
    pub fn probe_resource(&self) -> Option<ResourceKey> {
        match self.kind {
            UpstreamKind::Chain { .. } => Some(ResourceKey::LatestBlock),
            UpstreamKind::Marketplace { .. } => self
                .probe_collection
                .as_ref()
                .map(|collection| ResourceKey::FloorPrice { collection: collection.clone() }),
        }
    }
}

/// Errors produced when parsing a resource key from its wire form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceKeyError {
    #[error("empty resource key")]
    Empty,
    #[error("unknown resource key: {0}")]
    Unknown(String),
    #[error("floor price key is missing a collection: {0}")]
    MissingCollection(String),
}

/// A piece of data a caller can request from the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    /// Latest block (or slot) of a chain. Served by chain upstreams.
    LatestBlock,
    /// Floor price of one collection. Served by marketplace upstreams.
    FloorPrice { collection: String },
}

impl ResourceKey {
    const LATEST_BLOCK: &'static str = "latest_block";
    const FLOOR_PRICE_PREFIX: &'static str = "floor_price:";

    /// Low-cardinality label for metrics (the collection is dropped).
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::LatestBlock => "latest_block",
            Self::FloorPrice { .. } => "floor_price",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestBlock => f.write_str(Self::LATEST_BLOCK),
            Self::FloorPrice { collection } => {
                write!(f, "{}{collection}", Self::FLOOR_PRICE_PREFIX)
            }
        }
    }
}

impl FromStr for ResourceKey {
    type Err = ResourceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ResourceKeyError::Empty);
        }
        if s == Self::LATEST_BLOCK {
            return Ok(Self::LatestBlock);
        }
        if let Some(collection) = s.strip_prefix(Self::FLOOR_PRICE_PREFIX) {
            let collection = collection.trim();
            if collection.is_empty() {
                return Err(ResourceKeyError::MissingCollection(s.to_string()));
            }
            return Ok(Self::FloorPrice { collection: collection.to_string() });
        }
        Err(ResourceKeyError::Unknown(s.to_string()))
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a list of wire-form resource keys, failing on the first invalid one.
///
/// Duplicates are removed while preserving first-seen order.
///
/// # Errors
///
/// Returns [`ResourceKeyError`] for the first key that cannot be parsed.
pub fn parse_resource_keys<S: AsRef<str>>(
    raw: &[S],
) -> Result<Vec<ResourceKey>, ResourceKeyError> {
    let mut keys: Vec<ResourceKey> = Vec::with_capacity(raw.len());
    for item in raw {
        let key: ResourceKey = item.as_ref().parse()?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Descriptive collection data returned alongside a floor price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_count: Option<u64>,
}

/// Canonical shape every upstream response is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedValue {
    ChainHead {
        chain_id: u64,
        block_number: u64,
    },
    FloorPrice {
        collection: String,
        floor_price: f64,
        currency: String,
        #[serde(default)]
        metadata: CollectionMetadata,
    },
}

/// Whether a snapshot field came from a fetch in this request or from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cache,
}

/// One resolved field of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotField {
    pub upstream_id: String,
    pub value: NormalizedValue,
    pub source: DataSource,
    /// When the value was fetched from the upstream (not when it was served).
    pub fetched_at: DateTime<Utc>,
    /// `true` if the value is older than the upstream's cache TTL.
    pub stale: bool,
    /// The live failure that forced a cache fallback, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchErrorReport>,
}

/// Everything one upstream contributed to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResult {
    /// Resolved fields keyed by wire-form resource key.
    pub fields: BTreeMap<String, SnapshotField>,
    /// Live errors keyed by wire-form resource key, including fields served from cache.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, FetchErrorReport>,
}

/// How much of a snapshot could be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// Every requested field is present and live.
    Complete,
    /// Some fields are cached or omitted.
    Partial,
    /// Nothing could be resolved, live or cached.
    Empty,
}

/// Merged, point-in-time result of one aggregator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub generated_at: DateTime<Utc>,
    pub completeness: Completeness,
    pub upstreams: BTreeMap<String, UpstreamResult>,
}

impl MarketSnapshot {
    /// Returns the resolved field for one upstream and resource, if present.
    #[must_use]
    pub fn field(&self, upstream_id: &str, key: &ResourceKey) -> Option<&SnapshotField> {
        self.upstreams.get(upstream_id)?.fields.get(&key.to_string())
    }

    /// Maps each resolved field (`"<upstream>/<resource>"`) to its upstream and source.
    #[must_use]
    pub fn sources(&self) -> BTreeMap<String, (String, DataSource)> {
        self.upstreams
            .iter()
            .flat_map(|(upstream_id, result)| {
                result.fields.iter().map(move |(key, field)| {
                    (format!("{upstream_id}/{key}"), (upstream_id.clone(), field.source))
                })
            })
            .collect()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.upstreams.values().map(|r| r.fields.len()).sum()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.count_by_source(DataSource::Live)
    }

    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.count_by_source(DataSource::Cache)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completeness == Completeness::Empty
    }

    fn count_by_source(&self, source: DataSource) -> usize {
        self.upstreams
            .values()
            .flat_map(|r| r.fields.values())
            .filter(|f| f.source == source)
            .count()
    }
}

/// Status-table row maintained by the health reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub upstream_id: String,
    pub display_name: String,
    pub kind: UpstreamKind,
    pub operational: bool,
    /// `None` until the first probe completes.
    pub last_checked_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    /// Most recent value returned by a successful probe. Kept across failed probes.
    pub last_value_observed: Option<NormalizedValue>,
    pub last_error: Option<FetchErrorReport>,
    pub circuit_state: CircuitStatus,
}

impl HealthRecord {
    /// Record for an upstream that has not been probed yet.
    #[must_use]
    pub fn unprobed(target: &UpstreamTarget) -> Self {
        Self {
            upstream_id: target.id.to_string(),
            display_name: target.display_name.clone(),
            kind: target.kind,
            operational: false,
            last_checked_at: None,
            latency_ms: None,
            last_value_observed: None,
            last_error: None,
            circuit_state: CircuitStatus::Closed,
        }
    }
}

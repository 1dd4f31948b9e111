//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `set_default` calls
//! 2. **Config file**: TOML file named by the `PULSE_CONFIG` env var (default
//!    `config/config.toml`, optional)
//! 3. **Environment variables**: `PULSE__<SECTION>__<FIELD>` override single fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP bind address and port
//! - [`AggregatorSettings`]: wall-clock budget and concurrency pool for user requests
//! - [`FetcherSettings`]: default per-attempt timeout and retry policy
//! - [`CircuitBreakerSettings`]: failure threshold and recovery probe interval
//! - [`HealthSettings`]: probe interval and concurrency pool for the health reporter
//! - [`UpstreamEntry`]: one chain RPC endpoint or marketplace API
//! - [`LoggingConfig`], [`MetricsConfig`]
//!
//! Hot reload is not supported; the configuration is read once at startup.
//!
//! # Example
//!
//! ```toml
//! [aggregator]
//! wall_clock_budget_ms = 8000
//!
//! [[upstreams]]
//! id = "ethereum"
//! display_name = "Ethereum"
//! kind = "chain"
//! protocol = "evm"
//! chain_id = 1
//! base_url = "https://eth.llamarpc.com"
//! rate_limit_per_minute = 120
//!
//! [[upstreams]]
//! id = "opensea"
//! kind = "marketplace"
//! api = "open_sea"
//! base_url = "https://api.opensea.io"
//! auth_token_env = "OPENSEA_API_KEY"
//! probe_collection = "pudgypenguins"
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};
use thiserror::Error;

use crate::{
    aggregator::AggregatorConfig,
    types::{ChainProtocol, MarketplaceApi, UpstreamKind, UpstreamTarget},
    upstream::{circuit_breaker::CircuitBreakerConfig, retry::RetryPolicy},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("auth token env var {var} for upstream {upstream} is not set")]
    MissingAuthToken { upstream: String, var: String },
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

/// Settings for user-triggered snapshot requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// Overall budget for one snapshot. Pending fetches are abandoned after it. Defaults to
    /// `8000`.
    #[serde(default = "default_wall_clock_budget_ms")]
    pub wall_clock_budget_ms: u64,

    /// Maximum concurrent upstream requests made on behalf of snapshots. Defaults to `64`.
    #[serde(default = "default_aggregator_concurrency")]
    pub concurrency_limit: usize,
}

fn default_wall_clock_budget_ms() -> u64 {
    8000
}

fn default_aggregator_concurrency() -> usize {
    64
}

/// Retry settings. `max_attempts` includes the first attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_jitter_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherSettings {
    /// Per-attempt timeout used when an upstream does not set `timeout_ms`. Defaults to
    /// `5000`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens. Defaults to `5`.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds spent open before one recovery probe is allowed. Defaults to `30`.
    #[serde(default = "default_recovery_probe_interval_seconds")]
    pub recovery_probe_interval_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_probe_interval_seconds() -> u64 {
    30
}

/// Health reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Whether the background prober runs. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between probes of one upstream in seconds. Defaults to `60`.
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,

    /// Size of the health reporter's own request pool. Defaults to `16`.
    #[serde(default = "default_health_concurrency")]
    pub concurrency_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_health_interval_seconds() -> u64 {
    60
}

fn default_health_concurrency() -> usize {
    16
}

/// Prometheus metrics configuration. When enabled, metrics are served at `/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKindName {
    Chain,
    Marketplace,
}

/// Configuration for a single upstream.
///
/// Chains need `protocol` and `chain_id`; marketplaces need `api` and `probe_collection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEntry {
    /// Unique identifier (e.g. `"ethereum"`, `"opensea"`).
    pub id: String,

    /// Name shown in the status table. Defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,

    pub kind: UpstreamKindName,

    #[serde(default)]
    pub protocol: Option<ChainProtocol>,

    #[serde(default)]
    pub chain_id: Option<u64>,

    #[serde(default)]
    pub api: Option<MarketplaceApi>,

    /// Must start with `http://` or `https://`.
    pub base_url: String,

    /// Literal API key or bearer token. Prefer `auth_token_env`.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Name of an environment variable holding the token.
    #[serde(default)]
    pub auth_token_env: Option<String>,

    /// Per-attempt timeout. Defaults to `fetcher.default_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Defaults to `60`.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Age after which cached values are reported stale. Defaults to `30`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Collection probed by the health reporter. Required for marketplaces.
    #[serde(default)]
    pub probe_collection: Option<String>,
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_cache_ttl_seconds() -> u64 {
    30
}

impl UpstreamEntry {
    fn kind(&self) -> Result<UpstreamKind, String> {
        match self.kind {
            UpstreamKindName::Chain => {
                let protocol = self
                    .protocol
                    .ok_or_else(|| format!("Chain upstream {} is missing protocol", self.id))?;
                let chain_id = self
                    .chain_id
                    .ok_or_else(|| format!("Chain upstream {} is missing chain_id", self.id))?;
                Ok(UpstreamKind::Chain { protocol, chain_id })
            }
            UpstreamKindName::Marketplace => {
                let api = self
                    .api
                    .ok_or_else(|| format!("Marketplace upstream {} is missing api", self.id))?;
                Ok(UpstreamKind::Marketplace { api })
            }
        }
    }
}

/// Root application configuration containing all subsystem settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub aggregator: AggregatorSettings,

    #[serde(default)]
    pub fetcher: FetcherSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub upstreams: Vec<UpstreamEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), bind_port: default_bind_port() }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            wall_clock_budget_ms: default_wall_clock_budget_ms(),
            concurrency_limit: default_aggregator_concurrency(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self { default_timeout_ms: default_timeout_ms(), retry: RetrySettings::default() }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_probe_interval_seconds: default_recovery_probe_interval_seconds(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_health_interval_seconds(),
            concurrency_limit: default_health_concurrency(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `PULSE__` prefix override any scalar value, using `__`
    /// as the separator for nested fields (e.g. `PULSE__SERVER__BIND_PORT=8080`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("server.bind_port", i64::from(default_bind_port()))?
            .set_default("aggregator.wall_clock_budget_ms", default_wall_clock_budget_ms())?
            .set_default("fetcher.default_timeout_ms", default_timeout_ms())?
            .set_default("circuit_breaker.failure_threshold", default_failure_threshold())?
            .set_default(
                "circuit_breaker.recovery_probe_interval_seconds",
                default_recovery_probe_interval_seconds(),
            )?
            .set_default("health.interval_seconds", default_health_interval_seconds())?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("PULSE").separator("__"))
            .build()?;

        Ok(config_builder.try_deserialize()?)
    }

    /// Loads configuration from `config/config.toml`, or the path in `PULSE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("PULSE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed into a valid `SocketAddr`.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn wall_clock_budget(&self) -> Duration {
        Duration::from_millis(self.aggregator.wall_clock_budget_ms)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_seconds)
    }

    #[must_use]
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig { wall_clock_budget: self.wall_clock_budget() }
    }

    #[must_use]
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            recovery_probe_interval: Duration::from_secs(
                self.circuit_breaker.recovery_probe_interval_seconds,
            ),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.fetcher.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            jitter: Duration::from_millis(retry.jitter_ms),
        }
    }

    fn upstream_timeout(&self, entry: &UpstreamEntry) -> Duration {
        Duration::from_millis(entry.timeout_ms.unwrap_or(self.fetcher.default_timeout_ms))
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least one upstream, with unique non-empty ids
    /// - Chain and marketplace entries carry the fields their kind needs
    /// - Base URLs use `http` or `https`
    /// - Rate limits, timeouts and intervals are greater than zero
    /// - Every per-fetch timeout is shorter than the wall-clock budget
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstreams.is_empty() {
            return Err("No upstreams configured".to_string());
        }

        let budget = self.wall_clock_budget();
        if budget.is_zero() {
            return Err("Wall-clock budget must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &self.upstreams {
            if entry.id.trim().is_empty() {
                return Err("Upstream id must not be empty".to_string());
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(format!("Duplicate upstream id: {}", entry.id));
            }

            let kind = entry.kind()?;

            if !(entry.base_url.starts_with("http://") || entry.base_url.starts_with("https://")) {
                return Err(format!(
                    "Invalid base URL for upstream {}: {}",
                    entry.id, entry.base_url
                ));
            }
            if entry.rate_limit_per_minute == 0 {
                return Err(format!("Rate limit must be greater than 0 for upstream {}", entry.id));
            }

            let timeout = self.upstream_timeout(entry);
            if timeout.is_zero() {
                return Err(format!("Timeout must be greater than 0 for upstream {}", entry.id));
            }
            if timeout >= budget {
                return Err(format!(
                    "Timeout for upstream {} ({}ms) must be below the wall-clock budget ({}ms)",
                    entry.id,
                    timeout.as_millis(),
                    budget.as_millis()
                ));
            }

            let has_probe = entry.probe_collection.as_deref().is_some_and(|c| !c.is_empty());
            if kind.is_marketplace() && !has_probe {
                return Err(format!("Marketplace upstream {} needs a probe_collection", entry.id));
            }
        }

        if self.fetcher.retry.max_attempts == 0 {
            return Err("Retry max_attempts must be at least 1".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("Circuit breaker failure threshold must be greater than 0".to_string());
        }
        if self.health.interval_seconds == 0 {
            return Err("Health check interval must be greater than 0".to_string());
        }
        if self.aggregator.concurrency_limit == 0 || self.health.concurrency_limit == 0 {
            return Err("Concurrency limits must be greater than 0".to_string());
        }
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }

    /// Builds the immutable upstream targets, resolving `auth_token_env` references.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`] if an entry is missing fields required by its kind
    /// - [`ConfigError::MissingAuthToken`] if a referenced env var is unset
    pub fn to_targets(&self) -> Result<Vec<UpstreamTarget>, ConfigError> {
        self.upstreams
            .iter()
            .map(|entry| {
                let kind = entry.kind().map_err(ConfigError::Invalid)?;

                let auth_token = match (&entry.auth_token, &entry.auth_token_env) {
                    (Some(token), _) => Some(token.clone()),
                    (None, Some(var)) => {
                        Some(std::env::var(var).map_err(|_| ConfigError::MissingAuthToken {
                            upstream: entry.id.clone(),
                            var: var.clone(),
                        })?)
                    }
                    (None, None) => None,
                };

                Ok(UpstreamTarget {
                    id: Arc::from(entry.id.as_str()),
                    display_name: entry.display_name.clone().unwrap_or_else(|| entry.id.clone()),
                    kind,
                    base_url: entry.base_url.clone(),
                    auth_token,
                    timeout: self.upstream_timeout(entry),
                    rate_limit_per_minute: entry.rate_limit_per_minute,
                    cache_ttl: Duration::from_secs(entry.cache_ttl_seconds),
                    probe_collection: entry.probe_collection.clone(),
                })
            })
            .collect()
    }
}

//! Everything that talks to, or guards access to, an upstream.
//!
//! - [`registry`]: the configured chain RPC endpoints and marketplace APIs
//! - [`rate_limiter`] and [`circuit_breaker`]: per-upstream eligibility checks
//! - [`fetcher`]: one network call with timeout and bounded [`retry`], parsed by a
//!   [`normalizer`]
//! - [`health`]: background prober maintaining the status table

pub mod circuit_breaker;
pub mod errors;
pub mod fetcher;
pub mod health;
pub mod http_client;
pub mod normalizer;
pub mod rate_limiter;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitStatus,
};
pub use errors::{FetchError, FetchErrorKind, FetchErrorReport, SkipReason};
pub use fetcher::{FetchOutcome, Fetcher};
pub use health::HealthReporter;
pub use http_client::{HttpClient, HttpClientConfig, UpstreamRequest};
pub use normalizer::{normalizer_for, ResponseNormalizer};
pub use rate_limiter::RateLimiter;
pub use registry::{EndpointRegistry, RegistryError};
pub use retry::RetryPolicy;

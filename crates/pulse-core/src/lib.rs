//! # Pulse Core
//!
//! Multi-chain connectivity and NFT marketplace aggregation. Fans a request out to every
//! configured chain RPC endpoint and marketplace API, and returns one merged
//! [`MarketSnapshot`](types::MarketSnapshot) even when some of them are slow, rate limited or
//! down.
//!
//! - **[`upstream`]**: endpoint registry, per-upstream rate limiter and circuit breaker, the
//!   fetcher with bounded retry, response normalizers, and the background health reporter.
//! - **[`aggregator`]**: concurrent fan-out under a wall-clock budget with cache fallback.
//! - **[`cache`]**: last-known-good value per upstream and resource.
//! - **[`config`]**: layered TOML and environment configuration.
//! - **[`metrics`]**: Prometheus metrics.
//! - **[`runtime`]**: wires everything into one context and owns shutdown.
//!
//! ## Request Flow
//!
//! ```text
//! get_snapshot(keys)
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ EndpointRegistry │ ── pairs each relevant upstream with each key
//! └────────┬─────────┘
//!          │ one task per pair
//!          ▼
//! ┌──────────────────┐
//! │  CircuitBreaker  │ ─── Open ──► Skipped
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   RateLimiter    │ ─── Empty ──► Skipped
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  HTTP + retry    │ ─── 429 ──► throttle bucket
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Normalizer    │ ─── Bad body ──► ParseError
//! └────────┬─────────┘
//!          ▼
//!   cache + breaker update
//!          │
//!          ▼
//! merge within budget, fill gaps from cache
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod types;
pub mod upstream;
pub mod utils;

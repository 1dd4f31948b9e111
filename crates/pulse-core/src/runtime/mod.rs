//! Runtime initialization and lifecycle management.
//!
//! Builds every core component from an [`AppConfig`](crate::config::AppConfig) into one
//! explicit context, starts the background health probers, and coordinates graceful shutdown.
//! Nothing here is global: two runtimes in one process share no state (apart from the
//! Prometheus recorder).
//!
//! # Examples
//!
//! ## Server Usage
//!
//! ```no_run
//! use pulse_core::{config::AppConfig, runtime::PulseRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = PulseRuntime::builder()
//!         .with_config(config)
//!         .enable_health_reporter()
//!         .build()?;
//!
//!     let aggregator = runtime.aggregator();
//!     let snapshot = aggregator.get_snapshot_from_wire(&["latest_block"]).await?;
//!     println!("{}", serde_json::to_string_pretty(&snapshot)?);
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedded Usage
//!
//! ```no_run
//! use pulse_core::{config::AppConfig, runtime::PulseRuntime};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // No background probing; the embedding application polls on its own schedule
//! let runtime = PulseRuntime::builder().with_config(AppConfig::load()?).build()?;
//! let table = runtime.health_reporter().probe_all().await;
//! # let _ = table;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{PulseRuntimeBuilder, RuntimeError};
pub use components::PulseComponents;
pub use lifecycle::PulseRuntime;

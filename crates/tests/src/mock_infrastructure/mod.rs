//! Mock upstreams for integration tests.
//!
//! ## Components
//!
//! - `UpstreamMockBuilder`: wraps mockito with chain RPC and marketplace response helpers
//! - `ScriptedUpstream`: axum server replaying a fixed sequence of responses (e.g. 429 then
//!   200), with optional per-response delay
//! - Test helpers for building configs and runtimes
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{evm_entry, UpstreamMockBuilder};
//!
//! let mut mock = UpstreamMockBuilder::new().await;
//! mock.mock_evm_head(1, 19_000_000).await;
//! let entry = evm_entry("ethereum", 1, &mock.url());
//! ```

pub mod scripted_upstream;
pub mod test_helpers;
pub mod upstream_mock;

pub use scripted_upstream::{ScriptedResponse, ScriptedUpstream};
pub use test_helpers::*;
pub use upstream_mock::UpstreamMockBuilder;

//! Small shared utilities.
//!
//! - [`clock`]: injectable time source so breaker, rate limiter and cache freshness can be
//!   driven deterministically in tests
//! - [`hex`]: JSON-RPC hex quantity parsing

pub mod clock;
pub mod hex;

pub use clock::{Clock, ManualClock, SystemClock};

//! Integration tests for pulse.
//!
//! Every test drives the real runtime against local mock upstreams; nothing leaves the
//! machine.
//!
//! - `aggregator_tests`: fan-out, cache fallback, omission, wall-clock budget
//! - `failsafe_tests`: circuit breaker opening, skipping and recovery
//! - `rate_limit_tests`: token bucket limits and HTTP 429 handling
//! - `health_tests`: health reporter isolation and shared breaker state
//! - `runtime_tests`: configuration loading through the runtime
//! - `mock_infrastructure`: reusable mock upstreams
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod aggregator_tests;

#[cfg(test)]
mod failsafe_tests;

#[cfg(test)]
mod health_tests;


#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;

//! HTTP surface for the pulse aggregation core.
//!
//! The binary in `main.rs` wires a [`pulse_core::runtime::PulseRuntime`] into the axum
//! [`router`]; the router lives in the library so it can be exercised without a socket.

pub mod router;

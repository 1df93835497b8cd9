//! Testing utilities and mock implementations
//!
//! Lets health checks be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;

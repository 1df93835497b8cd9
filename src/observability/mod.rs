//! Observability: structured logging and the health report HTTP endpoint

pub mod logging;
pub mod server;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use server::HealthServer;

// Span macros for structured logging
pub use logging::{health_check_span, mqtt_span};

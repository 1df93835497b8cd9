//! MQTT broker connectivity health checks
//!
//! Reports whether a process can currently reach and round-trip with its MQTT
//! broker, as a tri-state verdict suitable for readiness and liveness probes.
//!
//! # Overview
//!
//! - [`health::MqttHealthCheck`] wraps one broker client. A managed client is
//!   started once and reconnects on its own; a direct client is connected once
//!   and never reconnected by the check.
//! - Each invocation reads the connection state and, when connected, pings the
//!   broker. A missing connection and a ping that is cancelled or times out
//!   both read "Could not connect to the broker".
//! - [`health::HealthChecksBuilder`] registers checks under names and
//!   [`health::HealthCheckRegistry`] runs them into a [`health::HealthReport`].
//! - [`client`] ships rumqttc-backed clients for MQTT 3.1.1 and 5.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_healthcheck::health::{HealthChecksBuilder, HealthStatus, MqttCheckOptions};
//! use mqtt_healthcheck::testing::MockMqttClient;
//! use std::sync::Arc;
//!
//! tokio_test::block_on(async {
//!     let client = Arc::new(MockMqttClient::connected());
//!
//!     let mut builder = HealthChecksBuilder::new();
//!     builder
//!         .add_mqtt_direct(client, None, MqttCheckOptions::default())
//!         .unwrap();
//!     let registry = builder.build();
//!
//!     let report = registry.check_health().await;
//!     assert_eq!(report.status, HealthStatus::Healthy);
//!     assert!(report.entries.contains_key("Mqtt"));
//! });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod testing;

pub use client::{
    DirectMqttClient, ManagedMqttClient, ManagedMqttClientOptions, MqttClient, MqttClientOptions,
    PingError, RumqttDirectClient, RumqttManagedClient,
};
pub use config::{ConfigError, ServiceConfig};
pub use error::{HealthError, HealthResult};
pub use health::{
    HealthCheck, HealthCheckContext, HealthCheckResult, HealthChecksBuilder, HealthStatus,
    MqttHealthCheck, NOT_CONNECTED_REASON,
};

//! Registration and aggregated reporting of MQTT health checks

use async_trait::async_trait;
use mqtt_healthcheck::client::{ManagedMqttClientOptions, MqttClientOptions};
use mqtt_healthcheck::health::{
    HealthCheck, HealthCheckContext, HealthCheckRegistration, HealthCheckResult,
    HealthChecksBuilder, HealthStatus, MqttCheckOptions, NOT_CONNECTED_REASON,
};
use mqtt_healthcheck::testing::{MockMqttClient, PingBehavior};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn client_options() -> MqttClientOptions {
    MqttClientOptions::builder()
        .tcp_server("broker.internal", None)
        .client_id("registry-tests")
        .build()
        .unwrap()
}

struct PanickingCheck;

#[async_trait]
impl HealthCheck for PanickingCheck {
    async fn check_health(&self, _context: &HealthCheckContext) -> HealthCheckResult {
        panic!("check blew up");
    }
}

#[tokio::test]
async fn test_blank_name_rejected_before_client_is_touched() {
    for name in ["", " ", "\t"] {
        let client = Arc::new(MockMqttClient::disconnected());
        let mut builder = HealthChecksBuilder::new();

        let result = builder.add_mqtt_direct(
            client.clone(),
            Some(client_options()),
            MqttCheckOptions::named(name),
        );
        assert!(result.unwrap_err().is_invalid_argument());

        let result = builder.add_mqtt_managed(
            client.clone(),
            ManagedMqttClientOptions::new(client_options()),
            MqttCheckOptions::named(name),
        );
        assert!(result.unwrap_err().is_invalid_argument());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.connect_calls(), 0);
        assert_eq!(client.start_calls(), 0);
    }
}

#[tokio::test]
async fn test_default_registration_is_named_mqtt_and_unhealthy_on_failure() {
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_direct(
            Arc::new(MockMqttClient::disconnected()),
            None,
            MqttCheckOptions::default(),
        )
        .unwrap();
    let registry = builder.build();

    let report = registry.check_health().await;
    let entry = report.entry("Mqtt").expect("default name is Mqtt");

    assert_eq!(entry.status, HealthStatus::Unhealthy);
    assert_eq!(entry.description.as_deref(), Some(NOT_CONNECTED_REASON));
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_explicit_failure_status_is_reported() {
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_managed(
            Arc::new(MockMqttClient::disconnected()),
            ManagedMqttClientOptions::new(client_options()),
            MqttCheckOptions::named("broker")
                .with_failure_status(HealthStatus::Degraded)
                .with_tags(["infra"]),
        )
        .unwrap();
    let registry = builder.build();

    let report = registry.check_health().await;
    let entry = report.entry("broker").unwrap();

    assert_eq!(entry.status, HealthStatus::Degraded);
    assert_eq!(entry.tags, vec!["infra".to_string()]);
    assert_eq!(report.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_repeated_runs_reuse_one_client() {
    let client = Arc::new(MockMqttClient::connected());
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_managed(
            client.clone(),
            ManagedMqttClientOptions::new(client_options()),
            MqttCheckOptions::default(),
        )
        .unwrap();
    let registry = builder.build();

    for _ in 0..3 {
        assert!(registry.check_health().await.is_healthy());
    }

    client.wait_for_attempt(Duration::from_secs(1)).await;
    assert_eq!(client.start_calls(), 1);
    assert_eq!(client.ping_calls(), 3);
}

#[tokio::test]
async fn test_timeout_cancels_ping_and_reports_not_connected() {
    let client = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::WaitForCancel));
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_direct(
            client,
            None,
            MqttCheckOptions::default().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
    let registry = builder.build();

    let started = Instant::now();
    let report = registry.check_health().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    let entry = report.entry("Mqtt").unwrap();
    assert_eq!(entry.status, HealthStatus::Unhealthy);
    assert_eq!(entry.description.as_deref(), Some(NOT_CONNECTED_REASON));
}

#[tokio::test]
async fn test_checks_run_concurrently() {
    let first = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::Gated));
    let second = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::Gated));

    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_direct(first.clone(), None, MqttCheckOptions::named("first"))
        .unwrap()
        .add_mqtt_direct(second.clone(), None, MqttCheckOptions::named("second"))
        .unwrap();
    let registry = Arc::new(builder.build());

    let runner = registry.clone();
    let run = tokio::spawn(async move { runner.check_health().await });

    // Both pings are in flight before either is allowed to finish
    assert!(first.wait_for_pings(1, Duration::from_secs(1)).await);
    assert!(second.wait_for_pings(1, Duration::from_secs(1)).await);

    first.open_gate();
    second.open_gate();
    let report = run.await.unwrap();

    assert!(report.is_healthy());
    assert_eq!(report.entries.len(), 2);
}

#[tokio::test]
async fn test_panicking_check_becomes_failure_entry() {
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_check(
            HealthCheckRegistration::new("explodes", Arc::new(PanickingCheck))
                .unwrap()
                .with_failure_status(HealthStatus::Degraded),
        )
        .unwrap()
        .add_mqtt_direct(
            Arc::new(MockMqttClient::connected()),
            None,
            MqttCheckOptions::default(),
        )
        .unwrap();
    let registry = builder.build();

    let report = registry.check_health().await;

    assert_eq!(report.entry("explodes").unwrap().status, HealthStatus::Degraded);
    assert_eq!(report.entry("Mqtt").unwrap().status, HealthStatus::Healthy);
    assert_eq!(report.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_duplicate_mqtt_name_rejected_without_starting_client() {
    let client = Arc::new(MockMqttClient::disconnected());
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_direct(
            Arc::new(MockMqttClient::connected()),
            None,
            MqttCheckOptions::default(),
        )
        .unwrap();

    let second = builder.add_mqtt_managed(
        client.clone(),
        ManagedMqttClientOptions::new(client_options()),
        MqttCheckOptions::default(),
    );

    assert!(second.unwrap_err().is_invalid_argument());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.start_calls(), 0);
}

#[tokio::test]
async fn test_report_serializes_for_http_endpoint() {
    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_direct(
            Arc::new(MockMqttClient::disconnected()),
            None,
            MqttCheckOptions::default(),
        )
        .unwrap();
    let report = builder.build().check_health().await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["entries"]["Mqtt"]["description"], NOT_CONNECTED_REASON);
    assert!(json["checked_at"].is_string());
}

#[tokio::test]
async fn test_shutdown_releases_every_mqtt_client() {
    let managed = Arc::new(MockMqttClient::connected());
    let direct = Arc::new(MockMqttClient::connected());

    let mut builder = HealthChecksBuilder::new();
    builder
        .add_mqtt_managed(
            managed.clone(),
            ManagedMqttClientOptions::new(client_options()),
            MqttCheckOptions::named("managed"),
        )
        .unwrap()
        .add_mqtt_direct(direct.clone(), None, MqttCheckOptions::named("direct"))
        .unwrap();
    let registry = builder.build();

    registry.shutdown().await;

    assert_eq!(managed.stop_calls(), 1);
    assert_eq!(direct.disconnect_calls(), 1);
    assert!(!registry.check_health().await.is_healthy());
}

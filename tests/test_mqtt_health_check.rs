//! Behavior of the MQTT health check against scripted clients
//!
//! Tests focus on the verdict a caller observes: status, reason, and how many
//! times the client was touched.

use mqtt_healthcheck::client::{
    ManagedMqttClientOptions, MqttClientOptions, PingError, OPERATION_CANCELED_MESSAGE,
    TASK_CANCELED_MESSAGE,
};
use mqtt_healthcheck::health::{
    HealthCheck, HealthCheckContext, HealthCheckResult, HealthStatus, MqttHealthCheck,
    NOT_CONNECTED_REASON,
};
use mqtt_healthcheck::testing::{MockMqttClient, PingBehavior};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn managed_options() -> ManagedMqttClientOptions {
    let options = MqttClientOptions::builder()
        .tcp_server("broker.internal", Some(1883))
        .client_id("health-tests")
        .build()
        .unwrap();
    ManagedMqttClientOptions::new(options).with_auto_reconnect_delay(Duration::from_secs(1))
}

fn context(failure_status: HealthStatus) -> HealthCheckContext {
    HealthCheckContext::new(failure_status, CancellationToken::new())
}

#[tokio::test]
async fn test_absent_client_is_rejected_in_both_modes() {
    let managed = MqttHealthCheck::from_managed(None, Some(managed_options()));
    assert!(managed.unwrap_err().is_invalid_argument());

    let direct = MqttHealthCheck::from_direct(None, None);
    assert!(direct.unwrap_err().is_invalid_argument());
}

#[tokio::test]
async fn test_absent_managed_options_are_rejected() {
    let client = Arc::new(MockMqttClient::disconnected());
    let result = MqttHealthCheck::from_managed(Some(client.clone()), None);

    assert!(result.unwrap_err().is_invalid_argument());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.start_calls(), 0);
}

#[tokio::test]
async fn test_managed_client_receives_options_unchanged() {
    let client = Arc::new(MockMqttClient::disconnected());
    let options = managed_options();
    let _check = MqttHealthCheck::managed(client.clone(), options.clone()).unwrap();

    client.wait_for_attempt(Duration::from_secs(1)).await;
    assert_eq!(client.last_start_options(), Some(options));
}

#[tokio::test]
async fn test_direct_client_receives_options_unchanged() {
    let client = Arc::new(MockMqttClient::disconnected());
    let options = managed_options().client_options;
    let _check = MqttHealthCheck::direct(client.clone(), Some(options.clone())).unwrap();

    client.wait_for_attempt(Duration::from_secs(1)).await;
    assert_eq!(client.connect_calls(), 1);
    assert_eq!(client.last_connect_options(), Some(options));
}

#[tokio::test]
async fn test_failed_start_does_not_fail_construction() {
    let client = Arc::new(MockMqttClient::disconnected().with_start_failure("connection refused"));
    let check = MqttHealthCheck::managed(client.clone(), managed_options())
        .expect("start failures surface through checks, not construction");

    client.wait_for_attempt(Duration::from_secs(1)).await;
    let result = check.check_health(&context(HealthStatus::Unhealthy)).await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert_eq!(result.description.as_deref(), Some(NOT_CONNECTED_REASON));
}

#[tokio::test]
async fn test_failed_connect_does_not_fail_construction() {
    let client = Arc::new(MockMqttClient::disconnected().with_connect_failure("no route to host"));
    let check = MqttHealthCheck::direct(client.clone(), Some(managed_options().client_options))
        .expect("connect failures surface through checks, not construction");

    client.wait_for_attempt(Duration::from_secs(1)).await;
    let result = check.check_health(&context(HealthStatus::Unhealthy)).await;
    assert_eq!(result.description.as_deref(), Some(NOT_CONNECTED_REASON));
}

#[tokio::test]
async fn test_disconnected_client_is_unhealthy_without_ping() {
    let client = Arc::new(MockMqttClient::disconnected());
    let check = MqttHealthCheck::managed(client.clone(), managed_options()).unwrap();

    let result = check.check_health(&context(HealthStatus::Unhealthy)).await;

    assert_eq!(
        result,
        HealthCheckResult::unhealthy("Could not connect to the broker")
    );
    assert_eq!(client.ping_calls(), 0);
}

#[tokio::test]
async fn test_connected_client_with_successful_ping_is_healthy() {
    let client = Arc::new(MockMqttClient::connected());
    let check = MqttHealthCheck::direct(client.clone(), None).unwrap();

    let result = check.check_health(&context(HealthStatus::Unhealthy)).await;

    assert_eq!(result.status, HealthStatus::Healthy);
    assert_eq!(result.description, None);
    assert_eq!(client.ping_calls(), 1);
}

#[tokio::test]
async fn test_generic_cancellation_texts_read_as_not_connected() {
    for message in [OPERATION_CANCELED_MESSAGE, TASK_CANCELED_MESSAGE] {
        let client = Arc::new(
            MockMqttClient::connected().with_ping(PingBehavior::Fail(PingError::failed(message))),
        );
        let check = MqttHealthCheck::direct(client, None).unwrap();

        let result = check.check_health(&context(HealthStatus::Unhealthy)).await;
        assert_eq!(
            result.description.as_deref(),
            Some(NOT_CONNECTED_REASON),
            "message {message:?}"
        );
    }
}

#[tokio::test]
async fn test_structured_timeouts_read_as_not_connected() {
    for error in [PingError::Cancelled, PingError::TimedOut, PingError::NotConnected] {
        let client = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::Fail(error)));
        let check = MqttHealthCheck::direct(client, None).unwrap();

        let result = check.check_health(&context(HealthStatus::Unhealthy)).await;
        assert_eq!(result.description.as_deref(), Some(NOT_CONNECTED_REASON));
    }
}

#[tokio::test]
async fn test_other_ping_failures_pass_through_verbatim() {
    let client = Arc::new(
        MockMqttClient::connected()
            .with_ping(PingBehavior::Fail(PingError::failed("broker refused"))),
    );
    let check = MqttHealthCheck::direct(client, None).unwrap();

    let result = check.check_health(&context(HealthStatus::Unhealthy)).await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert_eq!(result.description.as_deref(), Some("broker refused"));
}

#[tokio::test]
async fn test_failure_status_follows_context() {
    let client = Arc::new(MockMqttClient::disconnected());
    let check = MqttHealthCheck::direct(client, None).unwrap();

    let default = check.check_health(&HealthCheckContext::default()).await;
    assert_eq!(default.status, HealthStatus::Unhealthy);

    let degraded = check.check_health(&context(HealthStatus::Degraded)).await;
    assert_eq!(degraded.status, HealthStatus::Degraded);
    assert_eq!(degraded.description.as_deref(), Some(NOT_CONNECTED_REASON));
}

#[tokio::test]
async fn test_cancelled_context_bounds_the_ping() {
    let client = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::WaitForCancel));
    let check = MqttHealthCheck::direct(client, None).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        check.check_health(&HealthCheckContext::new(HealthStatus::Unhealthy, cancel)),
    )
    .await
    .expect("a cancelled context must end the check");

    assert_eq!(result.description.as_deref(), Some(NOT_CONNECTED_REASON));
}

#[tokio::test]
async fn test_verdict_tracks_connection_changes() {
    let client = Arc::new(MockMqttClient::disconnected());
    let check = MqttHealthCheck::managed(client.clone(), managed_options()).unwrap();
    let ctx = context(HealthStatus::Unhealthy);

    assert_eq!(check.check_health(&ctx).await.status, HealthStatus::Unhealthy);

    client.set_connected(true);
    assert_eq!(check.check_health(&ctx).await.status, HealthStatus::Healthy);

    client.set_connected(false);
    assert_eq!(check.check_health(&ctx).await.status, HealthStatus::Unhealthy);

    client.wait_for_attempt(Duration::from_secs(1)).await;
    assert_eq!(client.start_calls(), 1, "The check never restarts the client");
}

#[tokio::test]
async fn test_overlapping_checks_see_their_own_state() {
    let client = Arc::new(MockMqttClient::connected().with_ping(PingBehavior::Gated));
    let check = Arc::new(MqttHealthCheck::direct(client.clone(), None).unwrap());

    let first_check = check.clone();
    let first = tokio::spawn(async move {
        first_check
            .check_health(&HealthCheckContext::default())
            .await
    });
    assert!(client.wait_for_pings(1, Duration::from_secs(1)).await);

    // The connection drops while the first ping is still in flight
    client.set_connected(false);
    let second = check.check_health(&HealthCheckContext::default()).await;
    assert_eq!(second.description.as_deref(), Some(NOT_CONNECTED_REASON));

    client.open_gate();
    let first = first.await.unwrap();
    assert_eq!(first.status, HealthStatus::Healthy);
    assert_eq!(client.ping_calls(), 1);
}

proptest! {
    #[test]
    fn test_non_cancellation_messages_pass_through(message in "[a-zA-Z0-9 .,:_-]{1,64}") {
        prop_assume!(message != OPERATION_CANCELED_MESSAGE && message != TASK_CANCELED_MESSAGE);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            let client = Arc::new(
                MockMqttClient::connected()
                    .with_ping(PingBehavior::Fail(PingError::failed(message.clone()))),
            );
            let check = MqttHealthCheck::direct(client, None).unwrap();
            check.check_health(&HealthCheckContext::default()).await
        });

        prop_assert_eq!(result.status, HealthStatus::Unhealthy);
        prop_assert_eq!(result.description, Some(message));
    }
}

//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading: what a file turns into,
//! and which files are refused.

use mqtt_healthcheck::client::ProtocolVersion;
use mqtt_healthcheck::config::{CheckMode, ConfigError, ServiceConfig};
use mqtt_healthcheck::health::HealthStatus;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://broker.internal:1884"
client_id = "orders-health"
keep_alive_secs = 15

[health]
mode = "managed"
name = "Broker"
tags = ["ready", "infra"]
reconnect_delay_secs = 3

[server]
port = 9000
path = "/ready"
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.health.mode, CheckMode::Managed);
    assert_eq!(config.server.port, 9000);

    let managed = config.to_managed_options().unwrap();
    assert_eq!(managed.client_options.host, "broker.internal");
    assert_eq!(managed.client_options.port, 1884);
    assert_eq!(managed.client_options.client_id, "orders-health");
    assert_eq!(managed.client_options.keep_alive, Duration::from_secs(15));
    assert_eq!(managed.client_options.protocol_version, ProtocolVersion::V311);
    assert_eq!(managed.auto_reconnect_delay, Duration::from_secs(3));

    let check = config.to_check_options();
    assert_eq!(check.name, "Broker");
    assert_eq!(check.failure_status, HealthStatus::Unhealthy);
    assert_eq!(check.tags.len(), 2);
    assert_eq!(check.timeout, None);
}

#[test]
fn test_tls_broker_defaults_to_tls_port() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtts://broker.internal"
ca_file = "/etc/ssl/broker-ca.pem"

[health]
mode = "direct"
failure_status = "degraded"
timeout_ms = 750
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();
    let options = config.to_client_options().unwrap();

    assert!(options.tls.use_tls);
    assert_eq!(options.port, 8883);
    assert_eq!(
        options.tls.ca_file.as_deref(),
        Some(Path::new("/etc/ssl/broker-ca.pem"))
    );

    let check = config.to_check_options();
    assert_eq!(check.failure_status, HealthStatus::Degraded);
    assert_eq!(check.timeout, Some(Duration::from_millis(750)));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ServiceConfig::load_from_file(Path::new("/nonexistent/mqtt-health.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[mqtt\nbroker_url = ");
    let result = ServiceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_mqtt_section_is_rejected() {
    let temp_file = write_config(
        r#"
[health]
name = "Mqtt"
"#,
    );
    let result = ServiceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_are_rejected_at_load() {
    let cases = [
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[health]\nname = \"\"",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[health]\ntimeout_ms = 0",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\nkeep_alive_secs = 1",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\nprobe_topic = \"health/#\"",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[server]\npath = \"/\"",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[server]\npath = \"/live/\"",
        "[mqtt]\nbroker_url = \"not a url\"",
    ];

    for content in cases {
        let temp_file = write_config(content);
        let result = ServiceConfig::load_from_file(temp_file.path());
        assert!(result.is_err(), "expected rejection for:\n{content}");
    }
}

#[test]
fn test_show_round_trips_through_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
protocol_version = "v5"
"#,
    );
    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = ServiceConfig::from_toml(&rendered).unwrap();
    assert_eq!(reparsed, config);
}

//! Service configuration
//!
//! A TOML file with `[mqtt]`, `[health]` and `[server]` sections. Broker
//! credentials never live in the file: it names the environment variables
//! that hold them.

use crate::client::{
    ClientError, ManagedMqttClientOptions, MqttClientOptions, MqttClientOptionsBuilder,
    ProtocolVersion,
};
use crate::health::{HealthStatus, MqttCheckOptions, DEFAULT_MQTT_CHECK_NAME};
use crate::observability::server::LIVENESS_PATH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main service configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Generated per process when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default)]
    pub protocol_version: ProtocolVersionSetting,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// PEM trust root for `mqtts://` brokers
    pub ca_file: Option<PathBuf>,
    pub probe_topic: Option<String>,
}

fn default_keep_alive_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersionSetting {
    #[default]
    V311,
    V5,
}

impl From<ProtocolVersionSetting> for ProtocolVersion {
    fn from(setting: ProtocolVersionSetting) -> Self {
        match setting {
            ProtocolVersionSetting::V311 => ProtocolVersion::V311,
            ProtocolVersionSetting::V5 => ProtocolVersion::V5,
        }
    }
}

/// How the health check owns its client
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// The client reconnects on its own
    #[default]
    Managed,
    /// The client is connected once and never reconnected
    Direct,
}

/// Health check registration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default)]
    pub mode: CheckMode,
    #[serde(default = "default_check_name")]
    pub name: String,
    #[serde(default)]
    pub failure_status: HealthStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timeout_ms: Option<u64>,
    /// Managed mode only
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_check_name() -> String {
    DEFAULT_MQTT_CHECK_NAME.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            mode: CheckMode::default(),
            name: default_check_name(),
            failure_status: HealthStatus::default(),
            tags: Vec::new(),
            timeout_ms: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

/// HTTP endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path segment serving the health report
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "healthz".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            path: default_path(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid MQTT settings: {0}")]
    Client(#[from] ClientError),
}

impl ServiceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "health.name must not be empty".to_string(),
            ));
        }
        if self.health.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "health.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        let report_path = self.server.path.trim_matches('/');
        if report_path.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "server.path must not be empty".to_string(),
            ));
        }
        if report_path == LIVENESS_PATH {
            return Err(ConfigError::InvalidConfig(format!(
                "server.path must not be {LIVENESS_PATH:?}, which serves the liveness probe"
            )));
        }

        // Credentials are left out: they are only resolved when connecting
        let options = self.options_builder()?.build()?;
        if self.mqtt.ca_file.is_some() && !options.tls.use_tls {
            return Err(ConfigError::InvalidConfig(
                "mqtt.ca_file requires an mqtts:// broker_url".to_string(),
            ));
        }

        Ok(())
    }

    fn options_builder(&self) -> Result<MqttClientOptionsBuilder, ConfigError> {
        let mut builder = MqttClientOptions::from_url(&self.mqtt.broker_url)?
            .protocol_version(self.mqtt.protocol_version.into())
            .keep_alive(Duration::from_secs(self.mqtt.keep_alive_secs));

        if let Some(client_id) = &self.mqtt.client_id {
            builder = builder.client_id(client_id.clone());
        }
        if let Some(topic) = &self.mqtt.probe_topic {
            builder = builder.probe_topic(topic.clone());
        }
        Ok(builder)
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Client options with credentials resolved from the environment.
    ///
    /// A variable named in the file but missing from the environment is an
    /// error rather than a silent anonymous connect.
    pub fn to_client_options(&self) -> Result<MqttClientOptions, ConfigError> {
        let mut builder = self.options_builder()?;
        if let Some(username_env) = &self.mqtt.username_env {
            let username = Self::get_env_var_required(username_env)?;
            let password = match &self.mqtt.password_env {
                Some(password_env) => Self::get_env_var_required(password_env)?,
                None => String::new(),
            };
            builder = builder.credentials(username, password);
        }

        let mut options = builder.build()?;
        options.tls.ca_file = self.mqtt.ca_file.clone();
        Ok(options)
    }

    pub fn to_managed_options(&self) -> Result<ManagedMqttClientOptions, ConfigError> {
        Ok(ManagedMqttClientOptions::new(self.to_client_options()?)
            .with_auto_reconnect_delay(Duration::from_secs(self.health.reconnect_delay_secs)))
    }

    /// Registration settings for the MQTT health check
    pub fn to_check_options(&self) -> MqttCheckOptions {
        let options = MqttCheckOptions::named(self.health.name.clone())
            .with_failure_status(self.health.failure_status)
            .with_tags(self.health.tags.iter().cloned());
        match self.health.timeout_ms {
            Some(timeout_ms) => options.with_timeout(Duration::from_millis(timeout_ms)),
            None => options,
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "test-service"

[health]
mode = "direct"
tags = ["ready"]
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

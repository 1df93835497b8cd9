//! Connection options for the broker clients
//!
//! Options are built once by whoever wires the health check and handed to the
//! client unchanged. Conversion into `rumqttc` options lives here too, so both
//! protocol versions are configured from the same bundle.

use super::ClientError;
use rumqttc::Transport as RumqttcTransport;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// MQTT protocol revision spoken on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V311,
    V5,
}

impl ProtocolVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "v311" | "3.1.1" | "311" | "v3" => Some(ProtocolVersion::V311),
            "v5" | "5" | "5.0" => Some(ProtocolVersion::V5),
            _ => None,
        }
    }
}

/// Username/password pair sent in CONNECT
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// TLS posture of the connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsOptions {
    pub use_tls: bool,
    /// PEM trust root. The platform roots are used when absent.
    pub ca_file: Option<PathBuf>,
}

/// Everything needed to (re)establish a broker connection
#[derive(Debug, Clone, PartialEq)]
pub struct MqttClientOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub protocol_version: ProtocolVersion,
    pub tls: TlsOptions,
    pub keep_alive: Duration,
    /// Topic the ping round-trip publishes to
    pub probe_topic: Option<String>,
}

impl MqttClientOptions {
    pub fn builder() -> MqttClientOptionsBuilder {
        MqttClientOptionsBuilder::default()
    }

    /// Build options from a `mqtt://` or `mqtts://` URL
    pub fn from_url(broker_url: &str) -> Result<MqttClientOptionsBuilder, ClientError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ClientError::InvalidBrokerUrl(broker_url.to_string()))?;

        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ClientError::InvalidBrokerUrl(broker_url.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ClientError::InvalidBrokerUrl(broker_url.to_string()))?;

        let mut builder = MqttClientOptions::builder().tcp_server(host, url.port());
        if use_tls {
            builder = builder.tls(TlsOptions {
                use_tls: true,
                ca_file: None,
            });
        }
        Ok(builder)
    }

    /// Topic used by the ping round-trip
    pub fn probe_topic(&self) -> String {
        self.probe_topic
            .clone()
            .unwrap_or_else(|| format!("health/{}/ping", self.client_id))
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.host.trim().is_empty() {
            return Err(ClientError::InvalidOptions("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ClientError::InvalidOptions("port must be non-zero".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ClientError::InvalidOptions("client id is empty".to_string()));
        }
        if self.keep_alive < MIN_KEEP_ALIVE {
            return Err(ClientError::InvalidOptions(format!(
                "keep alive must be at least {}s",
                MIN_KEEP_ALIVE.as_secs()
            )));
        }

        let topic = self.probe_topic();
        if topic.is_empty() || topic.contains(|c| c == '+' || c == '#') {
            return Err(ClientError::InvalidOptions(format!(
                "probe topic '{topic}' must be a concrete topic name"
            )));
        }

        Ok(())
    }

    /// Resolve the TLS transport, reading the trust root when one is configured
    fn transport(&self) -> Result<Option<RumqttcTransport>, ClientError> {
        if !self.tls.use_tls {
            return Ok(None);
        }

        let transport = match &self.tls.ca_file {
            Some(path) => {
                let ca = std::fs::read(path).map_err(ClientError::Tls)?;
                RumqttcTransport::tls(ca, None, None)
            }
            None => RumqttcTransport::tls_with_default_config(),
        };
        Ok(Some(transport))
    }

    /// Convert into MQTT 3.1.1 options
    pub(crate) fn to_v311_options(&self) -> Result<rumqttc::MqttOptions, ClientError> {
        self.validate()?;

        let mut mqtt_options = rumqttc::MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(self.keep_alive);

        if let Some(credentials) = &self.credentials {
            mqtt_options.set_credentials(&credentials.username, &credentials.password);
        }
        if let Some(transport) = self.transport()? {
            mqtt_options.set_transport(transport);
        }

        Ok(mqtt_options)
    }

    /// Convert into MQTT 5 options
    pub(crate) fn to_v5_options(&self) -> Result<rumqttc::v5::MqttOptions, ClientError> {
        self.validate()?;

        let mut mqtt_options =
            rumqttc::v5::MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(self.keep_alive);

        if let Some(credentials) = &self.credentials {
            mqtt_options.set_credentials(&credentials.username, &credentials.password);
        }
        if let Some(transport) = self.transport()? {
            mqtt_options.set_transport(transport);
        }

        Ok(mqtt_options)
    }
}

/// Fluent builder for [`MqttClientOptions`]
#[derive(Debug, Clone, Default)]
pub struct MqttClientOptionsBuilder {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    credentials: Option<Credentials>,
    protocol_version: ProtocolVersion,
    tls: TlsOptions,
    keep_alive: Option<Duration>,
    probe_topic: Option<String>,
}

impl MqttClientOptionsBuilder {
    /// Broker host and port. The port defaults by TLS posture.
    pub fn tcp_server<S: Into<String>>(mut self, host: S, port: Option<u16>) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    pub fn credentials<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn probe_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.probe_topic = Some(topic.into());
        self
    }

    pub fn build(self) -> Result<MqttClientOptions, ClientError> {
        let host = self.host.ok_or_else(|| {
            ClientError::InvalidOptions("no broker endpoint configured".to_string())
        })?;
        let port = self.port.unwrap_or(if self.tls.use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        });

        // Unique per process so two replicas don't kick each other off the broker
        let client_id = self
            .client_id
            .unwrap_or_else(|| format!("mqtt-health-{}", uuid::Uuid::new_v4().simple()));

        let options = MqttClientOptions {
            host,
            port,
            client_id,
            credentials: self.credentials,
            protocol_version: self.protocol_version,
            tls: self.tls,
            keep_alive: self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE),
            probe_topic: self.probe_topic,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Options for a client that reconnects on its own
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedMqttClientOptions {
    pub client_options: MqttClientOptions,
    /// Pause between a lost connection and the next attempt
    pub auto_reconnect_delay: Duration,
}

impl ManagedMqttClientOptions {
    pub fn new(client_options: MqttClientOptions) -> Self {
        Self {
            client_options,
            auto_reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_auto_reconnect_delay(mut self, delay: Duration) -> Self {
        self.auto_reconnect_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        self.client_options.validate()
    }
}

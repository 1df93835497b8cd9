//! Broker client abstraction consumed by the connectivity probe
//!
//! The probe never speaks MQTT itself. It talks to one of two client
//! flavours through the traits below:
//!
//! - [`DirectMqttClient`] - the caller owns the connection and connects explicitly;
//!   a lost connection stays lost until someone reconnects it
//! - [`ManagedMqttClient`] - once started, the client keeps itself connected,
//!   reconnecting after a configured delay
//!
//! [`RumqttDirectClient`] and [`RumqttManagedClient`] implement both on top of
//! `rumqttc`. Tests use [`crate::testing::MockMqttClient`].

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod connection;
pub mod direct;
pub mod managed;
pub mod options;
mod session;

pub use connection::{ConnectionEvent, ConnectionState};
pub use direct::RumqttDirectClient;
pub use managed::RumqttManagedClient;
pub use options::{
    Credentials, ManagedMqttClientOptions, MqttClientOptions, MqttClientOptionsBuilder,
    ProtocolVersion, TlsOptions,
};

/// Generic cancellation text reported by cancelled operations
pub const OPERATION_CANCELED_MESSAGE: &str = "The operation was canceled.";

/// Cancellation text some client libraries report for cancelled tasks
pub const TASK_CANCELED_MESSAGE: &str = "A task was canceled.";

/// Errors raised by client adapters while connecting or starting
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),
    #[error("No connection options supplied")]
    MissingOptions,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Client already started")]
    AlreadyStarted,
    #[error("Failed to load TLS material")]
    Tls(#[source] std::io::Error),
    #[error("{}", OPERATION_CANCELED_MESSAGE)]
    Cancelled,
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Outcome of a failed ping round-trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PingError {
    /// The caller's cancellation signal fired before the broker answered
    #[error("{}", OPERATION_CANCELED_MESSAGE)]
    Cancelled,
    /// The client gave up waiting on its own
    #[error("The operation has timed out.")]
    TimedOut,
    /// There was no live connection to ping over
    #[error("Client is not connected")]
    NotConnected,
    /// Any other failure, carrying the client's own message
    #[error("{0}")]
    Failed(String),
}

impl PingError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }

    /// True when the failure means "the broker did not answer in time" rather
    /// than "the broker answered with an error".
    ///
    /// Clients that only surface a message are matched on the generic
    /// cancellation texts.
    pub fn is_cancellation(&self) -> bool {
        match self {
            PingError::Cancelled | PingError::TimedOut | PingError::NotConnected => true,
            PingError::Failed(message) => {
                message == OPERATION_CANCELED_MESSAGE || message == TASK_CANCELED_MESSAGE
            }
        }
    }
}

/// Surface shared by both client flavours
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Whether the client currently holds a live broker connection
    fn is_connected(&self) -> bool;

    /// Round-trip with the broker, giving up when `cancel` fires
    async fn ping(&self, cancel: &CancellationToken) -> Result<(), PingError>;
}

/// Client whose connection is driven explicitly by its owner
#[async_trait]
pub trait DirectMqttClient: MqttClient {
    /// Connect using `options`. `None` is allowed when the client is already
    /// connected by its owner.
    async fn connect(
        &self,
        options: Option<MqttClientOptions>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>;

    /// Close the connection. Never reconnects afterwards.
    async fn disconnect(&self) -> Result<(), ClientError>;
}

/// Client that keeps itself connected once started
#[async_trait]
pub trait ManagedMqttClient: MqttClient {
    /// Start the autonomous connect/reconnect loop. Returns once the loop is
    /// running, not once the broker is reachable.
    async fn start(&self, options: ManagedMqttClientOptions) -> Result<(), ClientError>;

    /// Stop the reconnect loop and drop the connection
    async fn stop(&self) -> Result<(), ClientError>;
}

//! MQTT broker connectivity health check
//!
//! Answers "can this process currently reach and round-trip with its broker?".
//! The check wraps exactly one broker client, either one it connects once on
//! construction ([`DirectMqttClient`]) or one whose reconnect loop it starts
//! ([`ManagedMqttClient`]). Each invocation reads the client's connection
//! state and, when connected, pings the broker.
//!
//! Failure reasons are stable: a missing connection and a ping that was
//! cancelled or timed out both read [`NOT_CONNECTED_REASON`]; any other ping
//! failure carries the client's own message.

use crate::client::{
    DirectMqttClient, ManagedMqttClient, ManagedMqttClientOptions, MqttClient, MqttClientOptions,
    PingError,
};
use crate::error::{HealthError, HealthResult};
use crate::health::{HealthCheck, HealthCheckContext, HealthCheckResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason reported whenever the broker cannot be reached
pub const NOT_CONNECTED_REASON: &str = "Could not connect to the broker";

/// Which kind of client a check wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Direct,
    Managed,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::Direct => "direct",
            ClientMode::Managed => "managed",
        }
    }
}

enum BrokerClient {
    Direct {
        client: Arc<dyn DirectMqttClient>,
        options: Option<MqttClientOptions>,
    },
    Managed {
        client: Arc<dyn ManagedMqttClient>,
        options: ManagedMqttClientOptions,
    },
}

/// Health check reporting broker connectivity of one MQTT client
pub struct MqttHealthCheck {
    client: BrokerClient,
    /// Cancels the initial start or connect if the check is shut down first
    lifetime: CancellationToken,
}

impl MqttHealthCheck {
    /// Wrap a managed client and start its reconnect loop.
    ///
    /// Returns immediately: the loop is started on a background task and any
    /// connection failure shows up in later checks. Options that fail
    /// validation are rejected here.
    pub fn from_managed(
        client: Option<Arc<dyn ManagedMqttClient>>,
        options: Option<ManagedMqttClientOptions>,
    ) -> HealthResult<Self> {
        let client = client.ok_or_else(|| HealthError::missing("client"))?;
        let options = options.ok_or_else(|| HealthError::missing("options"))?;
        options
            .validate()
            .map_err(|e| HealthError::invalid_argument("options", e.to_string()))?;
        let runtime = current_runtime()?;
        let lifetime = CancellationToken::new();

        let starter = client.clone();
        let start_options = options.clone();
        let cancel = lifetime.child_token();
        runtime.spawn(async move {
            // A shutdown that wins the race must not be followed by a start
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Managed MQTT client start skipped after shutdown")
                }
                result = starter.start(start_options) => match result {
                    Ok(()) => debug!("Managed MQTT client start dispatched"),
                    Err(e) => warn!("Managed MQTT client failed to start: {}", e),
                },
            }
        });
        info!(mode = "managed", "MQTT health check created");

        Ok(Self {
            client: BrokerClient::Managed { client, options },
            lifetime,
        })
    }

    /// Wrap a directly-owned client and issue one connect attempt.
    ///
    /// `options` may be absent when the owner already connected the client.
    /// The attempt runs in the background and is never retried by the check.
    pub fn from_direct(
        client: Option<Arc<dyn DirectMqttClient>>,
        options: Option<MqttClientOptions>,
    ) -> HealthResult<Self> {
        let client = client.ok_or_else(|| HealthError::missing("client"))?;
        let runtime = current_runtime()?;
        let lifetime = CancellationToken::new();

        let connector = client.clone();
        let connect_options = options.clone();
        let cancel = lifetime.child_token();
        runtime.spawn(async move {
            match connector.connect(connect_options, cancel).await {
                Ok(()) => debug!("Initial MQTT connect succeeded"),
                Err(e) => warn!("Initial MQTT connect failed: {}", e),
            }
        });
        info!(mode = "direct", "MQTT health check created");

        Ok(Self {
            client: BrokerClient::Direct { client, options },
            lifetime,
        })
    }

    pub fn managed(
        client: Arc<dyn ManagedMqttClient>,
        options: ManagedMqttClientOptions,
    ) -> HealthResult<Self> {
        Self::from_managed(Some(client), Some(options))
    }

    pub fn direct(
        client: Arc<dyn DirectMqttClient>,
        options: Option<MqttClientOptions>,
    ) -> HealthResult<Self> {
        Self::from_direct(Some(client), options)
    }

    pub fn mode(&self) -> ClientMode {
        match self.client {
            BrokerClient::Direct { .. } => ClientMode::Direct,
            BrokerClient::Managed { .. } => ClientMode::Managed,
        }
    }

    /// Connection options the wrapped client was set up with
    pub fn client_options(&self) -> Option<&MqttClientOptions> {
        match &self.client {
            BrokerClient::Direct { options, .. } => options.as_ref(),
            BrokerClient::Managed { options, .. } => Some(&options.client_options),
        }
    }

    /// Stop a managed client or disconnect a direct one
    pub async fn shutdown(&self) -> HealthResult<()> {
        self.lifetime.cancel();
        match &self.client {
            BrokerClient::Direct { client, .. } => client.disconnect().await?,
            BrokerClient::Managed { client, .. } => client.stop().await?,
        }
        Ok(())
    }
}

impl fmt::Debug for MqttHealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttHealthCheck")
            .field("mode", &self.mode())
            .field("client_options", &self.client_options())
            .field("shut_down", &self.lifetime.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HealthCheck for MqttHealthCheck {
    async fn check_health(&self, context: &HealthCheckContext) -> HealthCheckResult {
        let start = Instant::now();

        let outcome = match &self.client {
            BrokerClient::Direct { client, .. } => {
                probe(client.as_ref(), &context.cancellation).await
            }
            BrokerClient::Managed { client, .. } => {
                probe(client.as_ref(), &context.cancellation).await
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                debug!(
                    mode = self.mode().as_str(),
                    elapsed_ms, "MQTT health check passed"
                );
                HealthCheckResult::healthy()
            }
            Err(reason) => {
                warn!(
                    mode = self.mode().as_str(),
                    reason = %reason,
                    elapsed_ms,
                    "MQTT health check failed"
                );
                HealthCheckResult::failure(context.failure_status, reason)
            }
        }
    }
}

/// Stable, human-readable reason for a failed ping
pub fn failure_reason(error: &PingError) -> String {
    if error.is_cancellation() {
        NOT_CONNECTED_REASON.to_string()
    } else {
        error.to_string()
    }
}

async fn probe<C>(client: &C, cancel: &CancellationToken) -> Result<(), String>
where
    C: MqttClient + ?Sized,
{
    if !client.is_connected() {
        return Err(NOT_CONNECTED_REASON.to_string());
    }

    match AssertUnwindSafe(client.ping(cancel)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(failure_reason(&e)),
        Err(panic) => Err(format!("Ping panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn current_runtime() -> HealthResult<Handle> {
    Handle::try_current().map_err(|e| HealthError::Runtime(e.to_string()))
}

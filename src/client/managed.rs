//! Self-reconnecting rumqttc client
//!
//! After [`ManagedMqttClient::start`] the event-loop task owns the connection:
//! whenever it drops, the task waits the configured auto-reconnect delay and
//! lets rumqttc dial the broker again, forever, until stopped.

use super::connection::{ConnectionEvent, ConnectionState};
use super::options::ManagedMqttClientOptions;
use super::session::{open_session, EventLoopTask, ReconnectPolicy, SessionLink};
use super::{ClientError, ManagedMqttClient, MqttClient, PingError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct RumqttManagedClient {
    link: Arc<SessionLink>,
    event_loop: Mutex<Option<EventLoopTask>>,
}

impl RumqttManagedClient {
    pub fn new() -> Self {
        Self {
            link: Arc::new(SessionLink::new()),
            event_loop: Mutex::new(None),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_started(&self) -> bool {
        self.event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Default for RumqttManagedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MqttClient for RumqttManagedClient {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<(), PingError> {
        self.link.ping(cancel).await
    }
}

#[async_trait]
impl ManagedMqttClient for RumqttManagedClient {
    async fn start(&self, options: ManagedMqttClientOptions) -> Result<(), ClientError> {
        let mut slot = self.event_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let client_options = &options.client_options;
        let (client, event_loop) = open_session(client_options)?;
        self.link.attach(client, client_options.probe_topic());
        self.link.transition(ConnectionEvent::ConnectStarted);

        *slot = Some(EventLoopTask::spawn(
            event_loop,
            self.link.clone(),
            ReconnectPolicy::After(options.auto_reconnect_delay),
        ));

        info!(
            host = %client_options.host,
            port = client_options.port,
            client_id = %client_options.client_id,
            reconnect_delay_ms = options.auto_reconnect_delay.as_millis() as u64,
            "Started managed MQTT client"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.link.close().await;

        let task = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
        self.link.transition(ConnectionEvent::Closed);

        info!("Managed MQTT client stopped");
        Ok(())
    }
}

impl Drop for RumqttManagedClient {
    fn drop(&mut self) {
        let slot = self.event_loop.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

//! Directly-owned rumqttc client
//!
//! Connects when asked and never reconnects on its own. Once the connection
//! drops, the event-loop task stops and the client reports disconnected until
//! its owner calls [`DirectMqttClient::connect`] again.

use super::connection::{ConnectionEvent, ConnectionState};
use super::options::MqttClientOptions;
use super::session::{
    open_session, wait_for_connection, EventLoopTask, ReconnectPolicy, SessionLink,
};
use super::{ClientError, DirectMqttClient, MqttClient, PingError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct RumqttDirectClient {
    link: Arc<SessionLink>,
    event_loop: Mutex<Option<EventLoopTask>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl RumqttDirectClient {
    pub fn new() -> Self {
        Self {
            link: Arc::new(SessionLink::new()),
            event_loop: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    fn take_event_loop(&self) -> Option<EventLoopTask> {
        self.event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn stop_event_loop(&self) {
        if let Some(task) = self.take_event_loop() {
            task.stop().await;
        }
    }
}

impl Default for RumqttDirectClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MqttClient for RumqttDirectClient {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<(), PingError> {
        self.link.ping(cancel).await
    }
}

#[async_trait]
impl DirectMqttClient for RumqttDirectClient {
    async fn connect(
        &self,
        options: Option<MqttClientOptions>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;

        if self.link.is_connected() {
            debug!("Connect requested on an already connected client");
            return Ok(());
        }
        let options = options.ok_or(ClientError::MissingOptions)?;
        let (client, event_loop) = open_session(&options)?;

        // A previous session that lost its connection is replaced wholesale
        self.stop_event_loop().await;
        self.link.attach(client, options.probe_topic());
        self.link.transition(ConnectionEvent::ConnectStarted);
        let state_rx = self.link.subscribe_state();

        let task = EventLoopTask::spawn(event_loop, self.link.clone(), ReconnectPolicy::Never);
        *self.event_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!(
            host = %options.host,
            port = options.port,
            client_id = %options.client_id,
            "Connecting to MQTT broker"
        );

        let result = wait_for_connection(state_rx, &cancel).await;
        if let Err(ClientError::Cancelled) = result {
            self.stop_event_loop().await;
            self.link.transition(ConnectionEvent::NetworkError(
                "connection attempt cancelled".to_string(),
            ));
        }
        result
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;

        self.link.close().await;
        self.stop_event_loop().await;
        self.link.transition(ConnectionEvent::Closed);

        info!("MQTT client disconnected");
        Ok(())
    }
}

impl Drop for RumqttDirectClient {
    fn drop(&mut self) {
        // No async in Drop: only make sure the background task does not outlive us
        let slot = self.event_loop.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

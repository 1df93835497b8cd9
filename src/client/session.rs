//! rumqttc session plumbing shared by the direct and managed clients
//!
//! A session is one `rumqttc` client/event-loop pair, for either protocol
//! version. The event loop is driven by a background task that feeds
//! connection state and broker acknowledgements into a [`SessionLink`], which
//! is what the public clients read from.

use super::connection::{determine_next_state, ConnectionEvent, ConnectionState};
use super::options::{MqttClientOptions, ProtocolVersion};
use super::{ClientError, PingError};
use rumqttc::v5::mqttbytes::v5::Packet as V5Packet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Request half of a session
pub(crate) enum SessionClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl SessionClient {
    /// QoS 1 publish; the broker's PUBACK completes the round-trip
    async fn publish_probe(&self, topic: &str) -> Result<(), String> {
        match self {
            SessionClient::V311(client) => client
                .publish(topic, rumqttc::QoS::AtLeastOnce, false, Vec::<u8>::new())
                .await
                .map_err(|e| e.to_string()),
            SessionClient::V5(client) => client
                .publish(
                    topic,
                    rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
                    false,
                    Vec::<u8>::new(),
                )
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn disconnect(&self) -> Result<(), String> {
        match self {
            SessionClient::V311(client) => client.disconnect().await.map_err(|e| e.to_string()),
            SessionClient::V5(client) => client.disconnect().await.map_err(|e| e.to_string()),
        }
    }
}

/// Event half of a session
pub(crate) enum SessionEventLoop {
    V311(rumqttc::EventLoop),
    V5(rumqttc::v5::EventLoop),
}

/// The few events the clients care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    ConnAck,
    PubAck,
    Other,
}

impl SessionEventLoop {
    async fn poll(&mut self) -> Result<SessionEvent, String> {
        match self {
            SessionEventLoop::V311(event_loop) => match event_loop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    Ok(SessionEvent::ConnAck)
                }
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::PubAck(_))) => {
                    Ok(SessionEvent::PubAck)
                }
                Ok(_) => Ok(SessionEvent::Other),
                Err(e) => Err(e.to_string()),
            },
            SessionEventLoop::V5(event_loop) => match event_loop.poll().await {
                Ok(rumqttc::v5::Event::Incoming(V5Packet::ConnAck(_))) => {
                    Ok(SessionEvent::ConnAck)
                }
                Ok(rumqttc::v5::Event::Incoming(V5Packet::PubAck(_))) => Ok(SessionEvent::PubAck),
                Ok(_) => Ok(SessionEvent::Other),
                Err(e) => Err(e.to_string()),
            },
        }
    }
}

/// Create the client/event-loop pair for `options`
pub(crate) fn open_session(
    options: &MqttClientOptions,
) -> Result<(SessionClient, SessionEventLoop), ClientError> {
    match options.protocol_version {
        ProtocolVersion::V311 => {
            let (client, event_loop) =
                rumqttc::AsyncClient::new(options.to_v311_options()?, REQUEST_CHANNEL_CAPACITY);
            Ok((SessionClient::V311(client), SessionEventLoop::V311(event_loop)))
        }
        ProtocolVersion::V5 => {
            let (client, event_loop) = rumqttc::v5::AsyncClient::new(
                options.to_v5_options()?,
                REQUEST_CHANNEL_CAPACITY,
            );
            Ok((SessionClient::V5(client), SessionEventLoop::V5(event_loop)))
        }
    }
}

struct ActiveSession {
    client: SessionClient,
    probe_topic: String,
}

/// State shared between a client and its event-loop task
pub(crate) struct SessionLink {
    session: RwLock<Option<Arc<ActiveSession>>>,
    state: watch::Sender<ConnectionState>,
    acks: watch::Sender<u64>,
}

impl SessionLink {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (acks, _) = watch::channel(0);
        Self {
            session: RwLock::new(None),
            state,
            acks,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn transition(&self, event: ConnectionEvent) {
        self.state
            .send_modify(|state| *state = determine_next_state(state, event));
    }

    fn record_ack(&self) {
        self.acks.send_modify(|count| *count = count.wrapping_add(1));
    }

    pub(crate) fn attach(&self, client: SessionClient, probe_topic: String) {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(ActiveSession {
            client,
            probe_topic,
        }));
    }

    fn current(&self) -> Option<Arc<ActiveSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn detach(&self) -> Option<Arc<ActiveSession>> {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Publish a probe and wait for the broker to acknowledge it
    pub(crate) async fn ping(&self, cancel: &CancellationToken) -> Result<(), PingError> {
        if !self.is_connected() {
            return Err(PingError::NotConnected);
        }
        let session = self.current().ok_or(PingError::NotConnected)?;
        let span = crate::mqtt_span!(operation = "ping", topic = %session.probe_topic);

        self.round_trip(&session, cancel).instrument(span).await
    }

    async fn round_trip(
        &self,
        session: &ActiveSession,
        cancel: &CancellationToken,
    ) -> Result<(), PingError> {
        // Subscribe before publishing so an early PUBACK is not missed
        let mut acks = self.acks.subscribe();
        let mut state = self.state.subscribe();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PingError::Cancelled),
            sent = session.client.publish_probe(&session.probe_topic) => {
                sent.map_err(PingError::Failed)?
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PingError::Cancelled),
            acked = acks.changed() => {
                acked.map_err(|_| PingError::failed("client closed before the broker answered"))
            }
            _ = state.wait_for(|s| !s.is_connected()) => Err(PingError::NotConnected),
        }
    }

    /// Detach the session and send DISCONNECT, waiting briefly for it to go out
    pub(crate) async fn close(&self) {
        let Some(session) = self.detach() else {
            return;
        };

        let mut state = self.subscribe_state();
        match session.client.disconnect().await {
            Ok(()) => {
                let _ = tokio::time::timeout(
                    SHUTDOWN_GRACE,
                    state.wait_for(|s| !s.is_connected()),
                )
                .await;
            }
            Err(e) => debug!("DISCONNECT not sent: {}", e),
        }
    }
}

/// What the event-loop task does after losing the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectPolicy {
    /// Stop driving the session; it stays disconnected
    Never,
    /// Wait, then let rumqttc reconnect on the next poll
    After(Duration),
}

/// Handle to a running event-loop task
pub(crate) struct EventLoopTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventLoopTask {
    pub(crate) fn spawn(
        event_loop: SessionEventLoop,
        link: Arc<SessionLink>,
        policy: ReconnectPolicy,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(drive(event_loop, link, policy, shutdown.clone()));
        Self { shutdown, handle }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and give it a moment to wind down
    pub(crate) async fn stop(self) {
        self.shutdown.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, self.handle).await {
            Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Err(_) => warn!("Event loop task didn't shut down gracefully, abandoning it"),
            _ => {}
        }
    }

    pub(crate) fn abort(&self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

async fn drive(
    mut event_loop: SessionEventLoop,
    link: Arc<SessionLink>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) {
    let mut reconnect_attempts = 0u32;

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(SessionEvent::ConnAck) => {
                reconnect_attempts = 0;
                link.transition(ConnectionEvent::ConnAckReceived);
            }
            Ok(SessionEvent::PubAck) => link.record_ack(),
            Ok(SessionEvent::Other) => {}
            Err(reason) => {
                link.transition(ConnectionEvent::NetworkError(reason));

                let ReconnectPolicy::After(delay) = policy else {
                    break;
                };
                reconnect_attempts = reconnect_attempts.saturating_add(1);
                link.transition(ConnectionEvent::ReconnectionStarted(reconnect_attempts));

                if !interruptible_sleep(&shutdown, delay).await {
                    break;
                }
            }
        }
    }

    debug!("MQTT event loop stopped");
}

/// Returns false if shutdown was requested before the delay elapsed
async fn interruptible_sleep(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown requested during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wait until the first connection attempt settles
pub(crate) async fn wait_for_connection(
    mut state_rx: watch::Receiver<ConnectionState>,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        settled = state_rx.wait_for(|s| !matches!(s, ConnectionState::Connecting)) => {
            match settled.as_deref() {
                Ok(ConnectionState::Connected) => Ok(()),
                Ok(ConnectionState::Disconnected(reason)) => {
                    Err(ClientError::ConnectionFailed(reason.clone()))
                }
                Ok(other) => Err(ClientError::ConnectionFailed(format!(
                    "connection attempt ended in state {other:?}"
                ))),
                Err(_) => Err(ClientError::ConnectionFailed(
                    "state channel closed".to_string(),
                )),
            }
        }
    }
}

//! Mock implementations for testing
//!
//! Provides a scriptable MQTT client that implements both client flavors, so
//! health checks can be exercised without a broker.

use crate::client::{
    ClientError, DirectMqttClient, ManagedMqttClient, ManagedMqttClientOptions, MqttClient,
    MqttClientOptions, PingError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// What the mock does when pinged
#[derive(Debug, Clone)]
pub enum PingBehavior {
    Succeed,
    Fail(PingError),
    /// Block until the caller cancels, then report cancellation
    WaitForCancel,
    /// Block until [`MockMqttClient::open_gate`] is called, then succeed
    Gated,
    Panic,
}

/// Mock MQTT client for testing
#[derive(Debug)]
pub struct MockMqttClient {
    connected: AtomicBool,
    connects_on_demand: bool,
    start_error: Option<String>,
    connect_error: Option<String>,
    ping_behavior: Mutex<PingBehavior>,
    gate: watch::Sender<bool>,
    attempted: Notify,
    ping_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    last_connect_options: Mutex<Option<MqttClientOptions>>,
    last_start_options: Mutex<Option<ManagedMqttClientOptions>>,
}

impl MockMqttClient {
    fn with_connected(connected: bool) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(connected),
            connects_on_demand: false,
            start_error: None,
            connect_error: None,
            ping_behavior: Mutex::new(PingBehavior::Succeed),
            gate,
            attempted: Notify::new(),
            ping_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            last_connect_options: Mutex::new(None),
            last_start_options: Mutex::new(None),
        }
    }

    pub fn connected() -> Self {
        Self::with_connected(true)
    }

    pub fn disconnected() -> Self {
        Self::with_connected(false)
    }

    pub fn with_ping(self, behavior: PingBehavior) -> Self {
        *self.ping_behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
        self
    }

    /// Become connected when `connect` or `start` is called
    pub fn connects_on_demand(mut self) -> Self {
        self.connects_on_demand = true;
        self
    }

    pub fn with_start_failure<S: Into<String>>(mut self, message: S) -> Self {
        self.start_error = Some(message.into());
        self
    }

    pub fn with_connect_failure<S: Into<String>>(mut self, message: S) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_ping_behavior(&self, behavior: PingBehavior) {
        *self.ping_behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Let every current and future gated ping complete
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until `connect` or `start` has been called, or the timeout passes
    pub async fn wait_for_attempt(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.attempted.notified()).await;
    }

    /// Wait until at least `count` pings have been issued, or the timeout passes
    pub async fn wait_for_pings(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.ping_calls() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_connect_options(&self) -> Option<MqttClientOptions> {
        self.last_connect_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_start_options(&self) -> Option<ManagedMqttClientOptions> {
        self.last_start_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ping_behavior(&self) -> PingBehavior {
        self.ping_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MqttClient for MockMqttClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<(), PingError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);

        match self.ping_behavior() {
            PingBehavior::Succeed => Ok(()),
            PingBehavior::Fail(error) => Err(error),
            PingBehavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(PingError::Cancelled)
            }
            PingBehavior::Gated => {
                let mut gate = self.gate.subscribe();
                tokio::select! {
                    _ = cancel.cancelled() => Err(PingError::Cancelled),
                    opened = gate.wait_for(|open| *open) => {
                        opened.map(|_| ()).map_err(|_| PingError::failed("gate dropped"))
                    }
                }
            }
            PingBehavior::Panic => panic!("mock ping panicked"),
        }
    }
}

#[async_trait]
impl DirectMqttClient for MockMqttClient {
    async fn connect(
        &self,
        options: Option<MqttClientOptions>,
        _cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_connect_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = options;
        self.attempted.notify_one();

        if let Some(message) = &self.connect_error {
            return Err(ClientError::ConnectionFailed(message.clone()));
        }
        if self.connects_on_demand {
            self.set_connected(true);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }
}

#[async_trait]
impl ManagedMqttClient for MockMqttClient {
    async fn start(&self, options: ManagedMqttClientOptions) -> Result<(), ClientError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_start_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(options);
        self.attempted.notify_one();

        if let Some(message) = &self.start_error {
            return Err(ClientError::ConnectionFailed(message.clone()));
        }
        if self.connects_on_demand {
            self.set_connected(true);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }
}

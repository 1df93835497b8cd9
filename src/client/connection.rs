//! Pure connection state management for the broker clients
//!
//! The clients own every transition; the health probe only reads the state.

use tracing::{error, info, warn};

/// Connection state of a broker client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Nothing started yet, or the owner disconnected
    Idle,
    /// Initial connection attempt in flight
    Connecting,
    /// CONNACK received, requests can round-trip
    Connected,
    /// Connection lost with reason
    Disconnected(String),
    /// Managed client waiting to retry (attempt count)
    Reconnecting(u32),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Things that happen to a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectStarted,
    ConnAckReceived,
    NetworkError(String),
    ReconnectionStarted(u32),
    Closed,
}

/// Determine next state after connection event (pure function)
pub fn determine_next_state(
    current_state: &ConnectionState,
    event: ConnectionEvent,
) -> ConnectionState {
    match event {
        ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
        ConnectionEvent::ConnAckReceived => {
            if matches!(current_state, ConnectionState::Reconnecting(_)) {
                info!("MQTT client reconnected");
            } else {
                info!("MQTT client connected");
            }
            ConnectionState::Connected
        }
        ConnectionEvent::NetworkError(reason) => {
            if current_state.is_connected() {
                warn!("MQTT connection lost: {}", reason);
            } else {
                error!("MQTT connection attempt failed: {}", reason);
            }
            ConnectionState::Disconnected(reason)
        }
        ConnectionEvent::ReconnectionStarted(attempt) => {
            info!("Starting reconnection attempt {}", attempt);
            ConnectionState::Reconnecting(attempt)
        }
        ConnectionEvent::Closed => ConnectionState::Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Idle.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected("x".to_string()).is_connected());
        assert!(!ConnectionState::Reconnecting(3).is_connected());
    }

    #[test]
    fn test_direct_lifecycle_transitions() {
        let state = determine_next_state(&ConnectionState::Idle, ConnectionEvent::ConnectStarted);
        assert_eq!(state, ConnectionState::Connecting);

        let state = determine_next_state(&state, ConnectionEvent::ConnAckReceived);
        assert_eq!(state, ConnectionState::Connected);

        let state = determine_next_state(
            &state,
            ConnectionEvent::NetworkError("connection reset".to_string()),
        );
        assert_eq!(
            state,
            ConnectionState::Disconnected("connection reset".to_string())
        );

        let state = determine_next_state(&state, ConnectionEvent::Closed);
        assert_eq!(state, ConnectionState::Idle);
    }

    #[test]
    fn test_managed_reconnect_cycle() {
        let lost = determine_next_state(
            &ConnectionState::Connected,
            ConnectionEvent::NetworkError("io error".to_string()),
        );
        let retrying = determine_next_state(&lost, ConnectionEvent::ReconnectionStarted(1));
        assert_eq!(retrying, ConnectionState::Reconnecting(1));

        let back = determine_next_state(&retrying, ConnectionEvent::ConnAckReceived);
        assert_eq!(back, ConnectionState::Connected);
    }
}

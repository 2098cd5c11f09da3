//! Pure state transition and liveness logic for the broker session
//!
//! `Disconnected --handshake--> Connecting --CONNACK--> Connected`, and
//! `Connected --publish failure / liveness loss--> Disconnected`.

use super::connection::{ConnectionState, LivenessCheck};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pure health monitoring and state transition logic
pub struct HealthMonitor;

/// Events that drive broker session state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A handshake attempt loop has started
    HandshakeStarted,
    /// CONNACK received
    HandshakeSucceeded,
    /// Handshake loop gave up (cancelled, exhausted or fatal)
    HandshakeAbandoned,
    /// Transport no longer reports a live connection
    LivenessLost,
    /// The transport refused a publish
    PublishFailed(String),
    /// Orderly disconnect
    Closed,
}

impl HealthMonitor {
    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(
        current: ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::HandshakeStarted => ConnectionState::Connecting,
            ConnectionEvent::HandshakeSucceeded => ConnectionState::Connected,
            ConnectionEvent::HandshakeAbandoned
            | ConnectionEvent::LivenessLost
            | ConnectionEvent::Closed => ConnectionState::Disconnected,
            ConnectionEvent::PublishFailed(_) => match current {
                ConnectionState::Connected => ConnectionState::Disconnected,
                other => other,
            },
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Decide whether the connection is alive (pure function)
    ///
    /// `since_last_inbound` is the time since the last packet received from
    /// the broker, CONNACK included.
    pub fn is_alive(
        mode: LivenessCheck,
        flag: bool,
        since_last_inbound: Option<Duration>,
        keep_alive: Duration,
    ) -> bool {
        if !flag {
            return false;
        }

        match mode {
            LivenessCheck::LocalFlag => true,
            LivenessCheck::KeepAlive => {
                since_last_inbound.is_some_and(|elapsed| elapsed <= keep_alive * 2)
            }
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState, event: &ConnectionEvent) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!(event = ?event, "MQTT connection lost");
            }
            (from, to) if from == to => {}
            _ => {
                debug!("MQTT connection state: {:?} -> {:?} ({:?})", from, to, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_next_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Disconnected,
                &ConnectionEvent::HandshakeStarted
            ),
            ConnectionState::Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connecting,
                &ConnectionEvent::HandshakeSucceeded
            ),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connected,
                &ConnectionEvent::LivenessLost
            ),
            ConnectionState::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connected,
                &ConnectionEvent::PublishFailed("channel closed".to_string())
            ),
            ConnectionState::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                ConnectionState::Connecting,
                &ConnectionEvent::HandshakeAbandoned
            ),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(ConnectionState::Disconnected));
    }

    #[test]
    fn test_local_flag_liveness_ignores_traffic() {
        let keep_alive = Duration::from_secs(15);
        assert!(HealthMonitor::is_alive(
            LivenessCheck::LocalFlag,
            true,
            None,
            keep_alive
        ));
        assert!(!HealthMonitor::is_alive(
            LivenessCheck::LocalFlag,
            false,
            Some(Duration::ZERO),
            keep_alive
        ));
    }

    #[test]
    fn test_keep_alive_liveness_requires_recent_traffic() {
        let keep_alive = Duration::from_secs(15);
        assert!(HealthMonitor::is_alive(
            LivenessCheck::KeepAlive,
            true,
            Some(Duration::from_secs(20)),
            keep_alive
        ));
        assert!(!HealthMonitor::is_alive(
            LivenessCheck::KeepAlive,
            true,
            Some(Duration::from_secs(31)),
            keep_alive
        ));
        assert!(!HealthMonitor::is_alive(
            LivenessCheck::KeepAlive,
            true,
            None,
            keep_alive
        ));
    }
}

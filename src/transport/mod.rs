//! Broker transport layer
//!
//! [`BrokerTransport`] is the seam to the broker wire protocol; the
//! rumqttc-backed implementation lives in [`mqtt`]. [`BrokerSession`] owns a
//! transport and runs the connect/reconnect state machine on top of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod mqtt;
pub mod session;

pub use mqtt::{ConnectionState, MqttError, MqttTransport};
pub use session::{BrokerError, BrokerSession, BrokerSessionConfig, PublishOutcome};

/// Handshake code: timed out waiting for the broker
pub const CODE_CONNECTION_TIMEOUT: i32 = -4;
/// Handshake code: established connection went away
pub const CODE_CONNECTION_LOST: i32 = -3;
/// Handshake code: network-level failure reaching the broker
pub const CODE_CONNECT_FAILED: i32 = -2;
/// Handshake code: never connected
pub const CODE_DISCONNECTED: i32 = -1;
/// Handshake code: connected
pub const CODE_CONNECTED: i32 = 0;

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    /// `host:port`, suitable for address resolution
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{scheme}://{}", self.address())
    }
}

/// Broker login
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryQos {
    /// Fire and forget, no acknowledgement
    #[default]
    AtMostOnce,
    /// Broker acknowledges with PUBACK
    AtLeastOnce,
}

/// Per-message publish options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: DeliveryQos,
    pub retain: bool,
}

/// Classification of a failed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials rejected; retrying with the same login will not help
    Auth,
    /// Broker refused for another reason (server busy, bad client id, ...)
    Refused,
    /// Broker unreachable or timed out
    Unreachable,
}

/// A failed broker handshake
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("MQTT handshake failed, rc={code} ({kind:?}): {detail}")]
pub struct HandshakeFailure {
    pub code: i32,
    pub kind: FailureKind,
    pub detail: String,
}

impl HandshakeFailure {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            code: CODE_CONNECT_FAILED,
            kind: FailureKind::Unreachable,
            detail: detail.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            code: CODE_CONNECTION_TIMEOUT,
            kind: FailureKind::Unreachable,
            detail: "no CONNACK before connect timeout".to_string(),
        }
    }

    pub fn refused(code: i32, detail: impl Into<String>) -> Self {
        Self {
            code,
            kind: FailureKind::Refused,
            detail: detail.into(),
        }
    }

    pub fn auth(code: i32, detail: impl Into<String>) -> Self {
        Self {
            code,
            kind: FailureKind::Auth,
            detail: detail.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind == FailureKind::Auth
    }
}

/// Broker wire-protocol client.
///
/// Implementations are driven by a single owner ([`BrokerSession`]); none of
/// the methods are called concurrently.
#[async_trait::async_trait]
pub trait BrokerTransport: Send {
    /// Set the broker address used by subsequent handshakes
    fn set_target(&mut self, target: BrokerTarget);

    /// Perform one handshake attempt
    async fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&BrokerCredentials>,
    ) -> Result<(), HandshakeFailure>;

    /// Whether the transport believes the connection is alive
    fn connected(&self) -> bool;

    /// Hand a message to the broker connection
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), MqttError>;

    /// Code of the most recent handshake outcome
    fn last_error_code(&self) -> i32;

    /// Close the connection, if any
    async fn disconnect(&mut self);
}

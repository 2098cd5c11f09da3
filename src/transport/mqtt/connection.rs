//! Pure connection state management for the MQTT transport
//!
//! This module contains pure functions for connection state, broker URL
//! parsing, option building and CONNACK return-code classification.

use crate::transport::{BrokerCredentials, BrokerTarget, DeliveryQos, HandshakeFailure};
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handshake done, or the connection was lost
    Disconnected,
    /// Handshake attempts in progress
    Connecting,
    /// Handshake succeeded and ready for publishing
    Connected,
}

/// How the transport decides the connection is alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessCheck {
    /// Trust the handshake flag until the event loop reports an error
    LocalFlag,
    /// Also require inbound traffic (at least PINGRESP) within two keep-alive periods
    #[default]
    KeepAlive,
}

/// Transport tuning
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub liveness: LivenessCheck,
    pub max_packet_size: u32,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            liveness: LivenessCheck::default(),
            max_packet_size: 16 * 1024,
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]` into a broker target
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerTarget, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerTarget { host, port, tls })
}

/// Build rumqttc options for one handshake attempt
pub fn configure_mqtt_options(
    client_id: &str,
    target: &BrokerTarget,
    credentials: Option<&BrokerCredentials>,
    settings: &MqttSettings,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, target.host.clone(), target.port);

    if target.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(settings.keep_alive);
    // rumqttc's own handshake timeout must not fire before ours
    mqtt_options.set_connection_timeout(settings.connect_timeout.as_secs().max(1) + 1);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(settings.max_packet_size));

    mqtt_options
}

/// MQTT v5 CONNACK reason code as sent on the wire.
///
/// The three MQTT 3.1.1 variants map to their v5 equivalents.
pub fn reason_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0x00,
        ConnectReturnCode::UnspecifiedError => 0x80,
        ConnectReturnCode::MalformedPacket => 0x81,
        ConnectReturnCode::ProtocolError => 0x82,
        ConnectReturnCode::ImplementationSpecificError => 0x83,
        ConnectReturnCode::UnsupportedProtocolVersion
        | ConnectReturnCode::RefusedProtocolVersion => 0x84,
        ConnectReturnCode::ClientIdentifierNotValid | ConnectReturnCode::BadClientId => 0x85,
        ConnectReturnCode::BadUserNamePassword => 0x86,
        ConnectReturnCode::NotAuthorized => 0x87,
        ConnectReturnCode::ServerUnavailable | ConnectReturnCode::ServiceUnavailable => 0x88,
        ConnectReturnCode::ServerBusy => 0x89,
        ConnectReturnCode::Banned => 0x8A,
        ConnectReturnCode::BadAuthenticationMethod => 0x8C,
        ConnectReturnCode::TopicNameInvalid => 0x90,
        ConnectReturnCode::PacketTooLarge => 0x95,
        ConnectReturnCode::QuotaExceeded => 0x97,
        ConnectReturnCode::PayloadFormatInvalid => 0x99,
        ConnectReturnCode::RetainNotSupported => 0x9A,
        ConnectReturnCode::QoSNotSupported => 0x9B,
        ConnectReturnCode::UseAnotherServer => 0x9C,
        ConnectReturnCode::ServerMoved => 0x9D,
        ConnectReturnCode::ConnectionRateExceeded => 0x9F,
    }
}

/// Map a CONNACK reason code to success or a classified failure
pub fn classify_return_code(code: ConnectReturnCode) -> Result<(), HandshakeFailure> {
    if matches!(code, ConnectReturnCode::Success) {
        return Ok(());
    }

    let label = format!("{code:?}");
    let auth = matches!(
        code,
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
    );
    let numeric = i32::from(reason_code(code));

    if auth {
        Err(HandshakeFailure::auth(
            numeric,
            format!("broker rejected credentials: {label}"),
        ))
    } else {
        Err(HandshakeFailure::refused(
            numeric,
            format!("broker refused connection: {label}"),
        ))
    }
}

/// Map the configured delivery level to the wire QoS
pub fn to_wire_qos(qos: DeliveryQos) -> QoS {
    match qos {
        DeliveryQos::AtMostOnce => QoS::AtMostOnce,
        DeliveryQos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FailureKind;

    #[test]
    fn test_parse_plain_url_with_default_port() {
        let target = parse_broker_url("mqtt://192.168.254.25").unwrap();
        assert_eq!(target, BrokerTarget::new("192.168.254.25", 1883));
    }

    #[test]
    fn test_parse_tls_url() {
        let target = parse_broker_url("mqtts://broker.local").unwrap();
        assert!(target.tls);
        assert_eq!(target.port, 8883);

        let target = parse_broker_url("mqtts://broker.local:9000").unwrap();
        assert_eq!(target.port, 9000);
    }

    #[test]
    fn test_parse_ipv6_host() {
        let target = parse_broker_url("mqtt://[::1]:1883").unwrap();
        assert_eq!(target.host, "::1");
    }

    #[test]
    fn test_invalid_broker_url() {
        assert!(matches!(
            parse_broker_url("invalid-url"),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_broker_url("http://broker:1883"),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let target = BrokerTarget::new("localhost", 1883);
        let credentials = BrokerCredentials {
            username: "sensor".to_string(),
            password: "secret".to_string(),
        };
        let options = configure_mqtt_options(
            "ESP_LIVE_MINI",
            &target,
            Some(&credentials),
            &MqttSettings::default(),
        );

        assert_eq!(options.client_id(), "ESP_LIVE_MINI");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.connection_timeout() > MqttSettings::default().connect_timeout.as_secs());
    }

    #[test]
    fn test_classify_return_codes() {
        assert!(classify_return_code(ConnectReturnCode::Success).is_ok());

        let failure = classify_return_code(ConnectReturnCode::BadUserNamePassword).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Auth);
        assert_eq!(failure.code, 134);

        let failure = classify_return_code(ConnectReturnCode::NotAuthorized).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Auth);
        assert_eq!(failure.code, 135);

        let failure = classify_return_code(ConnectReturnCode::ServerBusy).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Refused);
        assert_eq!(failure.code, 137);
    }

    #[test]
    fn test_reason_codes_match_wire_values() {
        let cases = [
            (ConnectReturnCode::Success, 0x00),
            (ConnectReturnCode::UnspecifiedError, 0x80),
            (ConnectReturnCode::ClientIdentifierNotValid, 0x85),
            (ConnectReturnCode::BadClientId, 0x85),
            (ConnectReturnCode::BadUserNamePassword, 0x86),
            (ConnectReturnCode::NotAuthorized, 0x87),
            (ConnectReturnCode::ServiceUnavailable, 0x88),
            (ConnectReturnCode::Banned, 0x8A),
            (ConnectReturnCode::ConnectionRateExceeded, 0x9F),
        ];

        for (code, expected) in cases {
            assert_eq!(reason_code(code), expected, "Failed for {code:?}");
        }
    }

    #[test]
    fn test_wire_qos_mapping() {
        assert_eq!(to_wire_qos(DeliveryQos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_wire_qos(DeliveryQos::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected,
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}

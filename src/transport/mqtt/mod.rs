//! rumqttc-backed broker transport
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, option building and return-code mapping
//! - [`health_monitor`] - Pure state transition and liveness logic
//! - [`client`] - Impure I/O: handshake, event loop driver, publishing
//!
//! # Usage
//!
//! ```rust,no_run
//! use hass_sensor_publisher::transport::mqtt::{MqttSettings, MqttTransport};
//! use hass_sensor_publisher::transport::{BrokerTarget, BrokerTransport};
//!
//! # tokio_test::block_on(async {
//! let mut transport = MqttTransport::new(MqttSettings::default());
//! transport.set_target(BrokerTarget::new("localhost", 1883));
//! transport.connect("sensor-node", None).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;

pub use client::MqttTransport;
pub use connection::{
    parse_broker_url, ConnectionState, LivenessCheck, MqttError, MqttSettings,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor};

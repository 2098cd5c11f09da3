//! Home Assistant sensor publisher
//!
//! Periodically publishes sensor readings to an MQTT broker so that a home
//! automation hub can discover and display them.
//!
//! # Overview
//!
//! - Network attachment with status polling
//! - Broker session with retrying handshakes and self-healing publish
//! - Discovery, state and Domoticz payload encoding
//! - A publisher that ties these together on a fixed interval
//!
//! # Quick Start
//!
//! ```rust
//! use hass_sensor_publisher::protocol::{PayloadCodec, SensorDescriptor};
//!
//! let sensor = SensorDescriptor::for_host(
//!     "ESPLiveMiniDummySensor",
//!     "homeassistant",
//!     Some("livingroom"),
//!     "temperature",
//!     "DummyTempSensor",
//!     "°C",
//! )
//! .with_value(20.0);
//!
//! let codec = PayloadCodec::default();
//! assert_eq!(sensor.state_topic(), "home/livingroom/ESPLiveMiniDummySensor");
//! assert_eq!(codec.encode_state(&sensor), br#"{"temperature":20.0}"#.to_vec());
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod retry;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, PublisherConfig};
pub use error::{PublisherError, PublisherResult};
pub use network::{NetworkLink, NetworkSession, NetworkState};
pub use protocol::{PayloadCodec, SensorDescriptor};
pub use publisher::{CycleReport, PublisherSettings, SensorPublisher};
pub use sensor::SensorSource;
pub use transport::{BrokerError, BrokerSession, BrokerTransport, MqttTransport};

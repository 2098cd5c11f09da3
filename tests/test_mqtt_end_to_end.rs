//! End-to-end publishing over a real MQTT connection
//!
//! A minimal in-process broker accepts the connection, acknowledges it and
//! records every byte the client sends afterwards.

use hass_sensor_publisher::config::PublisherConfig;
use hass_sensor_publisher::network::HostNetworkLink;
use hass_sensor_publisher::publisher::SensorPublisher;
use hass_sensor_publisher::transport::MqttTransport;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// CONNACK: no session present, reason Success, empty properties
const CONNACK_SUCCESS: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];

async fn spawn_recording_broker() -> (u16, Arc<Mutex<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                if socket.write_all(&CONNACK_SUCCESS).await.is_err() {
                    return;
                }
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    sink.lock().unwrap().extend_from_slice(&buf[..n]);
                }
            });
        }
    });

    (port, received)
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

#[tokio::test]
async fn test_publisher_sends_discovery_and_states() {
    let (port, received) = spawn_recording_broker().await;
    let config = PublisherConfig::from_toml_str(&format!(
        r#"
[network]
hostname = "ESPLiveMiniDummySensor"
poll_interval_ms = 10

[mqtt]
broker_url = "mqtt://127.0.0.1:{port}"
client_id = "ESP_LIVE_MINI"
connect_timeout_secs = 5

[publisher]
interval_ms = 100

[[sensors]]
device_class = "temperature"
name = "DummyTempSensor"
unit_of_measurement = "°C"
room = "livingroom"
"#
    ))
    .unwrap();

    let cancel = CancellationToken::new();
    let link = HostNetworkLink::new(config.reach_address().unwrap());
    let transport = MqttTransport::new(config.mqtt_settings());
    let mut publisher =
        SensorPublisher::from_config(&config, link, transport, cancel.clone()).unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        trigger.cancel();
    });

    publisher.run().await.unwrap();
    publisher.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bytes = received.lock().unwrap().clone();
    assert!(contains(
        &bytes,
        "homeassistant/temperature/ESPLiveMiniDummySensor/config"
    ));
    assert!(contains(&bytes, r#""value_template":"{{ value_json.temperature }}""#));
    assert!(contains(&bytes, "home/livingroom/ESPLiveMiniDummySensor"));
    assert!(contains(&bytes, r#"{"temperature":20.0}"#));
    assert!(contains(&bytes, r#"{"temperature":21.0}"#));
    assert!(publisher.cycles() >= 2);
}

//! Configuration loading and validation tests
//!
//! Tests focus on behavior of configuration loading, validation, and error handling.

use hass_sensor_publisher::config::{ConfigError, PublisherConfig, SourceConfig};
use hass_sensor_publisher::protocol::DOMOTICZ_IN_TOPIC;
use hass_sensor_publisher::transport::mqtt::LivenessCheck;
use hass_sensor_publisher::transport::DeliveryQos;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[network]
hostname = "ESPLiveMiniDummySensor"

[mqtt]
broker_url = "mqtt://192.168.254.25:1883"
client_id = "ESP_LIVE_MINI"

[[sensors]]
device_class = "temperature"
name = "DummyTempSensor"
unit_of_measurement = "°C"
room = "livingroom"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(MINIMAL);

    let config = PublisherConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.network.hostname, "ESPLiveMiniDummySensor");
    assert_eq!(config.mqtt.client_id, "ESP_LIVE_MINI");
    assert_eq!(config.sensors.len(), 1);
    assert_eq!(config.sensors[0].room.as_deref(), Some("livingroom"));
}

#[test]
fn test_config_applies_defaults() {
    let config = PublisherConfig::from_toml_str(MINIMAL).unwrap();

    assert_eq!(config.network.poll_interval_ms, 500);
    assert_eq!(config.network.max_attempts, None);
    assert_eq!(config.mqtt.keep_alive_secs, 15);
    assert_eq!(config.mqtt.qos, DeliveryQos::AtMostOnce);
    assert_eq!(config.mqtt.liveness, LivenessCheck::KeepAlive);
    assert!(!config.mqtt.retain_discovery);
    assert_eq!(config.mqtt.retry.max_attempts, None);
    assert!(!config.mqtt.retry.retry_auth_failures);
    assert_eq!(config.publisher.interval_ms, 2000);
    assert!(config.publisher.discovery);
    assert_eq!(config.publisher.discovery_prefix, "homeassistant");
    assert_eq!(config.publisher.precision, 2);
    assert!(matches!(
        config.sensors[0].source,
        SourceConfig::Counter { start, .. } if start == 20.0
    ));
}

#[test]
fn test_example_config_is_valid() {
    let config =
        PublisherConfig::from_toml_str(include_str!("../config/publisher.example.toml")).unwrap();

    assert_eq!(config.sensors.len(), 2);
    assert_eq!(config.mqtt.retry.backoff_ms, vec![1000, 2000]);
    assert!(matches!(config.sensors[1].source, SourceConfig::File { .. }));
    assert_eq!(config.sensors[1].domoticz_idx, Some(12));
}

#[test]
fn test_descriptors_use_topic_conventions() {
    let config = PublisherConfig::from_toml_str(MINIMAL).unwrap();

    let descriptors = config.descriptors();

    assert_eq!(descriptors.len(), 1);
    assert_eq!(
        descriptors[0].state_topic(),
        "home/livingroom/ESPLiveMiniDummySensor"
    );
    assert_eq!(
        descriptors[0].config_topic(),
        "homeassistant/temperature/ESPLiveMiniDummySensor/config"
    );
    assert_eq!(
        descriptors[0].value_template(),
        "{{ value_json.temperature }}"
    );
}

#[test]
fn test_topic_overrides_are_honored() {
    let content = format!(
        "{MINIMAL}\nstate_topic = \"sensors/attic\"\nconfig_topic = \"custom/attic/config\"\ndomoticz_idx = 4\n"
    );
    let config = PublisherConfig::from_toml_str(&content).unwrap();

    let descriptor = &config.descriptors()[0];

    assert_eq!(descriptor.state_topic(), "sensors/attic");
    assert_eq!(descriptor.config_topic(), "custom/attic/config");
    assert_eq!(descriptor.domoticz_idx(), Some(4));
    assert_ne!(descriptor.state_topic(), DOMOTICZ_IN_TOPIC);
}

#[test]
fn test_publisher_settings_follow_config() {
    let content = MINIMAL.replace(
        "[[sensors]]",
        "[publisher]\ninterval_ms = 10000\nprecision = 1\n\n[[sensors]]",
    );
    let config = PublisherConfig::from_toml_str(&content).unwrap();

    let settings = config.publisher_settings();

    assert_eq!(settings.interval, Duration::from_secs(10));
    assert_eq!(settings.codec.precision(), 1);
    assert!(!settings.publish.retain);
}

#[test]
fn test_missing_file_is_reported() {
    let result = PublisherConfig::load_from_file(std::path::Path::new("/nonexistent/publisher.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_rejected() {
    let result = PublisherConfig::from_toml_str("[network\nhostname = ");

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_hostname_is_rejected() {
    let content = MINIMAL.replace("ESPLiveMiniDummySensor", "living room");

    let result = PublisherConfig::from_toml_str(&content);

    assert!(matches!(result, Err(ConfigError::InvalidHostname(_))));
}

#[test]
fn test_config_without_sensors_is_rejected() {
    let content = MINIMAL.split("[[sensors]]").next().unwrap().to_string();

    let result = PublisherConfig::from_toml_str(&content);

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_duplicate_sensor_is_rejected() {
    let sensor = MINIMAL.split("[[sensors]]").nth(1).unwrap();
    let content = format!("{MINIMAL}\n[[sensors]]{sensor}");

    let result = PublisherConfig::from_toml_str(&content);

    match result {
        Err(ConfigError::Validation(message)) => assert!(message.contains("already publishes")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_wildcard_in_topic_is_rejected() {
    let content = format!("{MINIMAL}\nstate_topic = \"home/+/sensor\"\n");

    let result = PublisherConfig::from_toml_str(&content);

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_broker_url_is_rejected() {
    let content = MINIMAL.replace("mqtt://192.168.254.25:1883", "http://192.168.254.25");

    let result = PublisherConfig::from_toml_str(&content);

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_zero_interval_is_rejected() {
    let content = MINIMAL.replace("[[sensors]]", "[publisher]\ninterval_ms = 0\n\n[[sensors]]");

    let result = PublisherConfig::from_toml_str(&content);

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_short_keep_alive_is_rejected() {
    let content = MINIMAL.replace(
        "client_id = \"ESP_LIVE_MINI\"",
        "client_id = \"ESP_LIVE_MINI\"\nkeep_alive_secs = 3",
    );

    let result = PublisherConfig::from_toml_str(&content);

    assert!(
        matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("keep_alive_secs")),
        "got {result:?}"
    );
}

#[test]
fn test_missing_credential_variable_is_reported() {
    let content = MINIMAL.replace(
        "client_id = \"ESP_LIVE_MINI\"",
        "client_id = \"ESP_LIVE_MINI\"\nusername_env = \"HASS_PUBLISHER_TEST_UNSET_USER\"",
    );
    let config = PublisherConfig::from_toml_str(&content).unwrap();

    let result = config.broker_credentials();

    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "HASS_PUBLISHER_TEST_UNSET_USER"));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = PublisherConfig::from_toml_str(include_str!("../config/publisher.example.toml")).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = PublisherConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(config, reparsed);
}

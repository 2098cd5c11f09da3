//! Property tests for discovery and state payloads

use hass_sensor_publisher::protocol::{PayloadCodec, SensorDescriptor};
use proptest::prelude::*;
use serde_json::Value;

fn device_class() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,15}"
}

fn descriptor(device_class: &str, value: f64) -> SensorDescriptor {
    SensorDescriptor::for_host(
        "ESPLiveMiniDummySensor",
        "homeassistant",
        Some("livingroom"),
        device_class,
        "Property sensor",
        "°C",
    )
    .with_value(value)
}

proptest! {
    #[test]
    fn test_discovery_has_exactly_five_keys(class in device_class()) {
        let sensor = descriptor(&class, 0.0);
        let payload = PayloadCodec::default().encode_discovery(&sensor);
        let parsed: Value = serde_json::from_slice(&payload).unwrap();

        let object = parsed.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        prop_assert_eq!(
            keys,
            vec!["device_class", "name", "state_topic", "unit_of_measurement", "value_template"]
        );
        prop_assert_eq!(object["state_topic"].as_str(), Some(sensor.state_topic()));
    }

    #[test]
    fn test_value_template_matches_state_key(class in device_class(), value in -1000.0f64..1000.0) {
        let sensor = descriptor(&class, value);
        let codec = PayloadCodec::default();

        let state: Value = serde_json::from_slice(&codec.encode_state(&sensor)).unwrap();
        let state = state.as_object().unwrap();

        prop_assert_eq!(state.len(), 1);
        prop_assert!(state.contains_key(&class));
        prop_assert_eq!(sensor.value_template(), format!("{{{{ value_json.{class} }}}}"));
    }

    #[test]
    fn test_state_value_within_precision(value in -1000.0f64..1000.0, precision in 0u32..=4) {
        let sensor = descriptor("temperature", value);
        let codec = PayloadCodec::new(precision);

        let state: Value = serde_json::from_slice(&codec.encode_state(&sensor)).unwrap();
        let published = state["temperature"].as_f64().unwrap();

        let tolerance = 0.5 * 10f64.powi(-(precision as i32)) + 1e-9;
        prop_assert!((published - value).abs() <= tolerance, "{} vs {}", published, value);
    }

    #[test]
    fn test_domoticz_svalue_parses_back(idx in 0u32..10_000, value in -1000.0f64..1000.0) {
        let codec = PayloadCodec::default();

        let parsed: Value = serde_json::from_slice(&codec.encode_domoticz(idx, value)).unwrap();

        prop_assert_eq!(parsed["idx"].as_u64(), Some(u64::from(idx)));
        prop_assert_eq!(parsed["nvalue"].as_u64(), Some(0));
        let svalue: f64 = parsed["svalue"].as_str().unwrap().parse().unwrap();
        prop_assert!((svalue - value).abs() <= 0.005 + 1e-9);
    }
}

#[test]
fn test_reference_state_payload() {
    let payload = PayloadCodec::default().encode_state(&descriptor("temperature", 20.0));

    assert_eq!(payload, br#"{"temperature":20.0}"#.to_vec());
}

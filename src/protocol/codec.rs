//! Payload construction for discovery, state and Domoticz messages
//!
//! All payloads are compact JSON objects. Keys are emitted in a stable
//! (sorted) order so that captured traffic is easy to diff.

use super::sensor::SensorDescriptor;
use serde_json::{json, Map, Value};

/// Default number of decimal places for published values
pub const DEFAULT_PRECISION: u32 = 2;

/// Builds the wire payloads for a sensor. Encoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    precision: u32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl PayloadCodec {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Discovery message telling the hub how to read the state topic
    pub fn encode_discovery(&self, sensor: &SensorDescriptor) -> Vec<u8> {
        let message = json!({
            "device_class": sensor.device_class(),
            "name": sensor.name(),
            "state_topic": sensor.state_topic(),
            "unit_of_measurement": sensor.unit_of_measurement(),
            "value_template": sensor.value_template(),
        });
        message.to_string().into_bytes()
    }

    /// State message: `{<device_class>: <current_value>}`
    pub fn encode_state(&self, sensor: &SensorDescriptor) -> Vec<u8> {
        let mut message = Map::new();
        message.insert(
            sensor.device_class().to_string(),
            json!(self.round(sensor.current_value())),
        );
        Value::Object(message).to_string().into_bytes()
    }

    /// Domoticz device update: `{"idx": idx, "nvalue": 0, "svalue": "<value>"}`
    pub fn encode_domoticz(&self, idx: u32, value: f64) -> Vec<u8> {
        let svalue = format!("{:.*}", self.precision as usize, value);
        let message = json!({
            "idx": idx,
            "nvalue": 0,
            "svalue": svalue,
        });
        message.to_string().into_bytes()
    }

    /// Round to the configured number of decimal places
    pub fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision as i32);
        let scaled = value * factor;
        // Values this large carry no fractional digits to round away
        if !scaled.is_finite() {
            return value;
        }
        scaled.round() / factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_sensor() -> SensorDescriptor {
        SensorDescriptor::for_host(
            "ESPLiveMiniDummySensor",
            "homeassistant",
            Some("livingroom"),
            "temperature",
            "DummyTempSensor",
            "°C",
        )
    }

    #[test]
    fn test_state_payload_for_reference_value() {
        let sensor = dummy_sensor().with_value(20.0);
        let payload = PayloadCodec::default().encode_state(&sensor);

        assert_eq!(String::from_utf8(payload).unwrap(), r#"{"temperature":20.0}"#);
    }

    #[test]
    fn test_discovery_payload_is_compact_and_ordered() {
        let payload = PayloadCodec::default().encode_discovery(&dummy_sensor());

        assert_eq!(
            String::from_utf8(payload).unwrap(),
            concat!(
                r#"{"device_class":"temperature","name":"DummyTempSensor","#,
                r#""state_topic":"home/livingroom/ESPLiveMiniDummySensor","#,
                r#""unit_of_measurement":"°C","value_template":"{{ value_json.temperature }}"}"#
            )
        );
    }

    #[test]
    fn test_state_value_is_rounded() {
        let sensor = dummy_sensor().with_value(21.456);
        let payload = PayloadCodec::new(1).encode_state(&sensor);
        let parsed: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(parsed["temperature"].as_f64(), Some(21.5));
    }

    #[test]
    fn test_domoticz_payload() {
        let payload = PayloadCodec::new(0).encode_domoticz(7, 20.0);
        assert_eq!(
            String::from_utf8(payload).unwrap(),
            r#"{"idx":7,"nvalue":0,"svalue":"20"}"#
        );
    }

    #[test]
    fn test_huge_value_survives_rounding() {
        let huge = f64::MAX / 2.0;
        let codec = PayloadCodec::default();
        assert_eq!(codec.round(huge), huge);

        let payload = codec.encode_state(&dummy_sensor().with_value(huge));
        let parsed: Value = serde_json::from_slice(&payload).unwrap();
        let published = parsed["temperature"].as_f64().unwrap();
        assert!(published.is_finite());
        assert!((published - huge).abs() / huge < 1e-12);
    }

    #[test]
    fn test_non_finite_value_encodes_as_null() {
        let sensor = dummy_sensor().with_value(f64::NAN);
        let payload = PayloadCodec::default().encode_state(&sensor);
        assert_eq!(String::from_utf8(payload).unwrap(), r#"{"temperature":null}"#);
    }
}

//! Sensor descriptor: one measured quantity and where it is published

use super::topics::{build_config_topic, build_state_topic, build_value_template};
use serde::Serialize;

/// One measured quantity.
///
/// All string fields are fixed at construction. `value_template` is derived
/// from `device_class`, the same key [`PayloadCodec::encode_state`] writes,
/// so the two can never drift apart. `current_value` is written once per
/// publish cycle by the publisher that owns the descriptor.
///
/// [`PayloadCodec::encode_state`]: super::codec::PayloadCodec::encode_state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDescriptor {
    device_class: String,
    name: String,
    state_topic: String,
    unit_of_measurement: String,
    value_template: String,
    config_topic: String,
    domoticz_idx: Option<u32>,
    current_value: f64,
}

impl SensorDescriptor {
    /// Create a descriptor with explicit topics
    pub fn new(
        device_class: impl Into<String>,
        name: impl Into<String>,
        unit_of_measurement: impl Into<String>,
        state_topic: impl Into<String>,
        config_topic: impl Into<String>,
    ) -> Self {
        let device_class = device_class.into();
        let value_template = build_value_template(&device_class);
        Self {
            device_class,
            name: name.into(),
            state_topic: state_topic.into(),
            unit_of_measurement: unit_of_measurement.into(),
            value_template,
            config_topic: config_topic.into(),
            domoticz_idx: None,
            current_value: 0.0,
        }
    }

    /// Create a descriptor using the conventional topics for `hostname`
    pub fn for_host(
        hostname: &str,
        discovery_prefix: &str,
        room: Option<&str>,
        device_class: impl Into<String>,
        name: impl Into<String>,
        unit_of_measurement: impl Into<String>,
    ) -> Self {
        let device_class = device_class.into();
        let config_topic = build_config_topic(discovery_prefix, &device_class, hostname);
        let state_topic = build_state_topic(room, hostname);
        Self::new(
            device_class,
            name,
            unit_of_measurement,
            state_topic,
            config_topic,
        )
    }

    /// Also publish values to Domoticz under device index `idx`
    pub fn with_domoticz_idx(mut self, idx: u32) -> Self {
        self.domoticz_idx = Some(idx);
        self
    }

    /// Set the initial value
    pub fn with_value(mut self, value: f64) -> Self {
        self.current_value = value;
        self
    }

    /// Store the value acquired in this cycle
    pub(crate) fn record(&mut self, value: f64) {
        self.current_value = value;
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state_topic(&self) -> &str {
        &self.state_topic
    }

    pub fn unit_of_measurement(&self) -> &str {
        &self.unit_of_measurement
    }

    pub fn value_template(&self) -> &str {
        &self.value_template
    }

    pub fn config_topic(&self) -> &str {
        &self.config_topic
    }

    pub fn domoticz_idx(&self) -> Option<u32> {
        self.domoticz_idx
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_host_derives_topics_and_template() {
        let sensor = SensorDescriptor::for_host(
            "ESPLiveMiniDummySensor",
            "homeassistant",
            Some("livingroom"),
            "temperature",
            "DummyTempSensor",
            "°C",
        );

        assert_eq!(sensor.device_class(), "temperature");
        assert_eq!(sensor.name(), "DummyTempSensor");
        assert_eq!(sensor.unit_of_measurement(), "°C");
        assert_eq!(
            sensor.state_topic(),
            "home/livingroom/ESPLiveMiniDummySensor"
        );
        assert_eq!(
            sensor.config_topic(),
            "homeassistant/temperature/ESPLiveMiniDummySensor/config"
        );
        assert_eq!(sensor.value_template(), "{{ value_json.temperature }}");
        assert_eq!(sensor.domoticz_idx(), None);
    }

    #[test]
    fn test_record_only_touches_value() {
        let mut sensor = SensorDescriptor::new("humidity", "Hum", "%", "home/h", "ha/h/config");
        let before = sensor.clone();

        sensor.record(55.5);

        assert_eq!(sensor.current_value(), 55.5);
        assert_eq!(sensor.value_template(), before.value_template());
        assert_eq!(sensor.state_topic(), before.state_topic());
    }
}

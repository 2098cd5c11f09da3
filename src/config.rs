//! Configuration system for the sensor publisher
//!
//! Configuration is read once from a TOML file at startup and is immutable
//! for the lifetime of the process. Secrets never live in the file: it names
//! the environment variables that hold them, and they are resolved when the
//! sessions are built.

use crate::network::NetworkCredentials;
use crate::protocol::{
    build_config_topic, build_state_topic, validate_hostname, validate_publish_topic,
    validate_topic_level, PayloadCodec, SensorDescriptor, ValidationError,
    DEFAULT_DISCOVERY_PREFIX,
};
use crate::publisher::PublisherSettings;
use crate::retry::RetryPolicy;
use crate::sensor::{CountingSensor, FileSensor, SensorSource};
use crate::transport::mqtt::{parse_broker_url, LivenessCheck, MqttSettings};
use crate::transport::{
    BrokerCredentials, BrokerSessionConfig, BrokerTarget, DeliveryQos, PublishOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Maximum decimal places accepted for published values
pub const MAX_PRECISION: u32 = 6;

/// Smallest keep-alive the MQTT client accepts
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main publisher configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    pub network: NetworkSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publisher: PublisherSection,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Network identity and attach polling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Hostname reported to the network, also used in topics
    pub hostname: String,
    /// Network name to join, for links that need one
    pub ssid: Option<String>,
    /// Environment variable containing the network password
    pub password_env: Option<String>,
    /// Delay between link status checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up after this many status checks (unset = wait forever)
    pub max_attempts: Option<u32>,
    /// `host:port` checked to decide whether the link is up (defaults to the broker)
    pub reach_host: Option<String>,
}

fn default_poll_interval() -> u64 {
    500
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Client identifier presented in the CONNECT packet
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub qos: DeliveryQos,
    /// Retain discovery messages so a restarted hub still sees them
    #[serde(default)]
    pub retain_discovery: bool,
    #[serde(default)]
    pub liveness: LivenessCheck,
    #[serde(default)]
    pub retry: MqttRetrySection,
}

fn default_keep_alive() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    10
}

/// Handshake retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttRetrySection {
    /// Maximum handshake attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delays for the first attempts, in milliseconds
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
    /// Delay once `backoff_ms` is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
    /// Keep retrying when the broker rejects the credentials
    #[serde(default)]
    pub retry_auth_failures: bool,
}

fn default_sustained_delay() -> u64 {
    5000
}

impl Default for MqttRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: Vec::new(),
            sustained_delay_ms: default_sustained_delay(),
            retry_auth_failures: false,
        }
    }
}

impl MqttRetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_pattern: self.backoff_ms.clone(),
            sustained_delay_ms: self.sustained_delay_ms,
        }
    }
}

/// Publish loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherSection {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Announce sensors with discovery messages at startup
    #[serde(default = "default_true")]
    pub discovery: bool,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Decimal places in published values
    #[serde(default = "default_precision")]
    pub precision: u32,
}

fn default_interval() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_precision() -> u32 {
    crate::protocol::DEFAULT_PRECISION
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            discovery: true,
            discovery_prefix: default_discovery_prefix(),
            precision: default_precision(),
        }
    }
}

/// One published sensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub device_class: String,
    pub name: String,
    pub unit_of_measurement: String,
    /// Room level in the default state topic
    pub room: Option<String>,
    /// Overrides `home/<room>/<hostname>`
    pub state_topic: Option<String>,
    /// Overrides `<prefix>/<device_class>/<hostname>/config`
    pub config_topic: Option<String>,
    /// Also publish to Domoticz under this device index
    pub domoticz_idx: Option<u32>,
    #[serde(default)]
    pub source: SourceConfig,
}

/// Where a sensor's readings come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Incrementing generator for bench testing
    Counter {
        #[serde(default = "default_counter_start")]
        start: f64,
        #[serde(default = "default_counter_start")]
        min: f64,
        #[serde(default = "default_counter_max")]
        max: f64,
        #[serde(default = "default_counter_step")]
        step: f64,
    },
    /// Numeric file such as `/sys/class/thermal/thermal_zone0/temp`
    File {
        path: PathBuf,
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

fn default_counter_start() -> f64 {
    20.0
}

fn default_counter_max() -> f64 {
    35.0
}

fn default_counter_step() -> f64 {
    1.0
}

fn default_scale() -> f64 {
    1.0
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Counter {
            start: default_counter_start(),
            min: default_counter_start(),
            max: default_counter_max(),
            step: default_counter_step(),
        }
    }
}

impl SourceConfig {
    /// Instantiate the configured source
    pub fn build(&self) -> Box<dyn SensorSource> {
        match self {
            SourceConfig::Counter {
                start,
                min,
                max,
                step,
            } => Box::new(CountingSensor::new(*start, *min, *max, *step)),
            SourceConfig::File { path, scale } => Box::new(FileSensor::new(path.clone(), *scale)),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            SourceConfig::Counter {
                start,
                min,
                max,
                step,
            } => {
                if !(min <= start && start <= max) {
                    return Err(format!(
                        "counter bounds must satisfy min <= start <= max (got {min}, {start}, {max})"
                    ));
                }
                if *step <= 0.0 || !step.is_finite() {
                    return Err(format!("counter step must be positive (got {step})"));
                }
                Ok(())
            }
            SourceConfig::File { scale, .. } => {
                if *scale == 0.0 || !scale.is_finite() {
                    return Err(format!("file scale must be finite and non-zero (got {scale})"));
                }
                Ok(())
            }
        }
    }
}

impl SensorConfig {
    /// Build the descriptor for this sensor on `hostname`
    pub fn descriptor(&self, hostname: &str, discovery_prefix: &str) -> SensorDescriptor {
        let state_topic = self
            .state_topic
            .clone()
            .unwrap_or_else(|| build_state_topic(self.room.as_deref(), hostname));
        let config_topic = self
            .config_topic
            .clone()
            .unwrap_or_else(|| build_config_topic(discovery_prefix, &self.device_class, hostname));

        let descriptor = SensorDescriptor::new(
            self.device_class.clone(),
            self.name.clone(),
            self.unit_of_measurement.clone(),
            state_topic,
            config_topic,
        );

        match self.domoticz_idx {
            Some(idx) => descriptor.with_domoticz_idx(idx),
            None => descriptor,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid hostname: {0}")]
    InvalidHostname(#[source] ValidationError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl PublisherConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PublisherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_hostname(&self.network.hostname).map_err(ConfigError::InvalidHostname)?;

        if self.network.max_attempts == Some(0) {
            return Err(ConfigError::Validation(
                "network.max_attempts must be greater than 0 or unset".to_string(),
            ));
        }

        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.client_id cannot be empty".to_string(),
            ));
        }
        self.broker_target()?;
        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::Validation(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.mqtt
            .retry
            .policy()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("mqtt.retry: {e}")))?;

        if self.publisher.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "publisher.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.publisher.precision > MAX_PRECISION {
            return Err(ConfigError::Validation(format!(
                "publisher.precision must be at most {MAX_PRECISION}"
            )));
        }

        self.validate_sensors()
    }

    fn validate_sensors(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[sensors]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            let invalid = |detail: String| {
                ConfigError::Validation(format!("sensor '{}': {detail}", sensor.name))
            };

            validate_topic_level(&sensor.device_class)
                .map_err(|e| invalid(format!("device_class: {e}")))?;
            if let Some(room) = &sensor.room {
                validate_topic_level(room).map_err(|e| invalid(format!("room: {e}")))?;
            }
            for topic in [&sensor.state_topic, &sensor.config_topic]
                .into_iter()
                .flatten()
            {
                validate_publish_topic(topic).map_err(|e| invalid(format!("topic: {e}")))?;
            }
            sensor.source.validate().map_err(invalid)?;

            let descriptor = sensor.descriptor(&self.network.hostname, &self.publisher.discovery_prefix);
            let key = (
                descriptor.state_topic().to_string(),
                descriptor.device_class().to_string(),
            );
            if !seen.insert(key) {
                return Err(invalid(format!(
                    "another sensor already publishes {} on {}",
                    descriptor.device_class(),
                    descriptor.state_topic()
                )));
            }
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Broker address parsed from `broker_url`
    pub fn broker_target(&self) -> Result<BrokerTarget, ConfigError> {
        parse_broker_url(&self.mqtt.broker_url).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Broker login, if `username_env` is configured
    pub fn broker_credentials(&self) -> Result<Option<BrokerCredentials>, ConfigError> {
        let Some(username_env) = &self.mqtt.username_env else {
            return Ok(None);
        };

        let username = Self::get_env_var_required(username_env)?;
        let password = match &self.mqtt.password_env {
            Some(password_env) => Self::get_env_var_required(password_env)?,
            None => String::new(),
        };

        Ok(Some(BrokerCredentials { username, password }))
    }

    /// Network join credentials
    pub fn network_credentials(&self) -> Result<NetworkCredentials, ConfigError> {
        let password = match &self.network.password_env {
            Some(password_env) => Some(Self::get_env_var_required(password_env)?),
            None => None,
        };

        Ok(NetworkCredentials {
            ssid: self.network.ssid.clone(),
            password,
        })
    }

    /// Fixed-interval status polling, optionally capped
    pub fn network_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.network.poll_interval_ms);
        match self.network.max_attempts {
            Some(max_attempts) => policy.with_max_attempts(max_attempts),
            None => policy,
        }
    }

    /// Address checked by the host network link
    pub fn reach_address(&self) -> Result<String, ConfigError> {
        match &self.network.reach_host {
            Some(host) => Ok(host.clone()),
            None => Ok(self.broker_target()?.address()),
        }
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            liveness: self.mqtt.liveness,
            ..MqttSettings::default()
        }
    }

    /// Everything the broker session needs, with credentials resolved
    pub fn broker_session_config(&self) -> Result<BrokerSessionConfig, ConfigError> {
        Ok(BrokerSessionConfig {
            target: self.broker_target()?,
            client_id: self.mqtt.client_id.clone(),
            credentials: self.broker_credentials()?,
            retry: self.mqtt.retry.policy(),
            retry_auth_failures: self.mqtt.retry.retry_auth_failures,
        })
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            interval: Duration::from_millis(self.publisher.interval_ms),
            discovery: self.publisher.discovery,
            retain_discovery: self.mqtt.retain_discovery,
            publish: PublishOptions {
                qos: self.mqtt.qos,
                retain: false,
            },
            codec: PayloadCodec::new(self.publisher.precision),
        }
    }

    /// Descriptors for every configured sensor
    pub fn descriptors(&self) -> Vec<SensorDescriptor> {
        self.sensors
            .iter()
            .map(|sensor| sensor.descriptor(&self.network.hostname, &self.publisher.discovery_prefix))
            .collect()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
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
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

//! Topic naming conventions and identity validation
//!
//! Discovery configuration is published to
//! `<discovery_prefix>/<device_class>/<hostname>/config`; state messages go
//! to a freely configured topic, conventionally `home/<room>/<hostname>`.

use thiserror::Error;

/// Default discovery prefix watched by Home Assistant
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Topic Domoticz listens on for incoming device updates
pub const DOMOTICZ_IN_TOPIC: &str = "domoticz/in";

/// Normalize a topic: no leading or trailing slash, no empty levels
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the discovery topic for a sensor
pub fn build_config_topic(discovery_prefix: &str, device_class: &str, hostname: &str) -> String {
    canonicalize_topic(&format!("{discovery_prefix}/{device_class}/{hostname}/config"))
}

/// Build the default state topic: `home/<room>/<hostname>`, or `home/<hostname>` without a room
pub fn build_state_topic(room: Option<&str>, hostname: &str) -> String {
    match room {
        Some(room) => canonicalize_topic(&format!("home/{room}/{hostname}")),
        None => canonicalize_topic(&format!("home/{hostname}")),
    }
}

/// Value template that extracts `device_class` from the state payload
pub fn build_value_template(device_class: &str) -> String {
    format!("{{{{ value_json.{device_class} }}}}")
}

/// Validate a network hostname (RFC 1123 label)
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::EmptyHostname);
    }
    if hostname.len() > 63 {
        return Err(ValidationError::HostnameTooLong(hostname.len()));
    }

    for ch in hostname.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' {
            return Err(ValidationError::InvalidHostnameChar(ch));
        }
    }

    if hostname.starts_with('-') || hostname.ends_with('-') {
        return Err(ValidationError::InvalidHostnameChar('-'));
    }

    Ok(())
}

/// Validate a value that becomes a single topic level (device class, room)
pub fn validate_topic_level(level: &str) -> Result<(), ValidationError> {
    if level.is_empty() {
        return Err(ValidationError::EmptyTopicLevel);
    }

    for ch in level.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_whitespace() {
            return Err(ValidationError::InvalidTopicChar(ch));
        }
    }

    Ok(())
}

/// Validate a full publish topic
pub fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopicLevel);
    }
    if let Some(ch) = topic.chars().find(|ch| matches!(ch, '+' | '#')) {
        return Err(ValidationError::InvalidTopicChar(ch));
    }
    Ok(())
}

/// Identity and topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Hostname cannot be empty")]
    EmptyHostname,
    #[error("Hostname is {0} characters long, maximum is 63")]
    HostnameTooLong(usize),
    #[error("Hostname contains invalid character: '{0}'")]
    InvalidHostnameChar(char),
    #[error("Topic level cannot be empty")]
    EmptyTopicLevel,
    #[error("Topic contains invalid character: '{0}'")]
    InvalidTopicChar(char),
}

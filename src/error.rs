//! Top-level error type for the publisher
//!
//! Each layer has its own error enum; [`PublisherError`] wraps them so the
//! binary has a single type to report and map to an exit code.

use crate::config::ConfigError;
use crate::network::NetworkError;
use crate::sensor::SensorError;
use crate::transport::{BrokerError, MqttError};
use thiserror::Error;

/// Main error type for publisher operations
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
}

impl PublisherError {
    /// Whether the error only reports a requested shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PublisherError::Network(NetworkError::Cancelled)
                | PublisherError::Broker(BrokerError::Cancelled)
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PublisherError::Config(_) => 2,
            PublisherError::Broker(BrokerError::AuthRejected { .. }) => 3,
            _ if self.is_cancelled() => 0,
            _ => 1,
        }
    }
}

/// Result alias for publisher operations
pub type PublisherResult<T> = Result<T, PublisherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_recognised() {
        assert!(PublisherError::from(NetworkError::Cancelled).is_cancelled());
        assert!(PublisherError::from(BrokerError::Cancelled).is_cancelled());
        assert!(!PublisherError::from(BrokerError::AuthRejected { code: 134 }).is_cancelled());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PublisherError::from(BrokerError::Cancelled).exit_code(), 0);
        assert_eq!(
            PublisherError::from(BrokerError::AuthRejected { code: 135 }).exit_code(),
            3
        );
        assert_eq!(
            PublisherError::from(NetworkError::AttemptsExhausted { attempts: 4 }).exit_code(),
            1
        );
        assert_eq!(
            PublisherError::from(ConfigError::Validation("no sensors".to_string())).exit_code(),
            2
        );
    }

    #[test]
    fn test_error_display_includes_layer() {
        let error = PublisherError::from(BrokerError::AttemptsExhausted {
            attempts: 3,
            last_code: -2,
        });
        let rendered = error.to_string();
        assert!(rendered.starts_with("Broker error"));
        assert!(rendered.contains("rc=-2"));
    }
}

//! Value sources for published sensors
//!
//! A [`SensorSource`] yields the next reading for one sensor. Hardware drivers
//! implement it; the crate ships a counting generator for bench testing and a
//! file reader for sysfs-style numeric files.

pub mod counter;
pub mod file;

pub use counter::CountingSensor;
pub use file::FileSensor;

use async_trait::async_trait;
use thiserror::Error;

/// Sensor acquisition errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Failed to read sensor: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse sensor value '{raw}'")]
    Parse { raw: String },
    #[error("Sensor returned a non-finite value: {0}")]
    NonFinite(f64),
}

/// Source of readings for a single sensor
#[async_trait]
pub trait SensorSource: Send {
    /// Acquire the next value
    async fn next_value(&mut self) -> Result<f64, SensorError>;
}

/// Reject NaN and infinities before they reach a payload
pub fn ensure_finite(value: f64) -> Result<f64, SensorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SensorError::NonFinite(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite(20.5).unwrap(), 20.5);
        assert!(matches!(
            ensure_finite(f64::INFINITY),
            Err(SensorError::NonFinite(_))
        ));
        assert!(ensure_finite(f64::NAN).is_err());
    }
}

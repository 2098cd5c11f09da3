//! Reads a numeric value from a file, e.g. `/sys/class/thermal/thermal_zone0/temp`

use super::{ensure_finite, SensorError, SensorSource};
use async_trait::async_trait;
use std::path::PathBuf;

/// Sensor backed by a file containing a single number
#[derive(Debug, Clone)]
pub struct FileSensor {
    path: PathBuf,
    scale: f64,
}

impl FileSensor {
    /// `scale` multiplies the raw value (sysfs thermal zones report millidegrees, use 0.001)
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }

    /// Parse file contents into a scaled value (pure function)
    pub fn parse_reading(raw: &str, scale: f64) -> Result<f64, SensorError> {
        let trimmed = raw.trim();
        let value: f64 = trimmed.parse().map_err(|_| SensorError::Parse {
            raw: trimmed.to_string(),
        })?;
        ensure_finite(value * scale)
    }
}

#[async_trait]
impl SensorSource for FileSensor {
    async fn next_value(&mut self) -> Result<f64, SensorError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Self::parse_reading(&raw, self.scale)
    }
}

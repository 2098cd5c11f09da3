//! Counting value generator

use super::{SensorError, SensorSource};
use async_trait::async_trait;

/// Emits `start`, then steps upward, wrapping to `min` once a value would exceed `max`.
///
/// With the defaults the sequence is 20, 21, ..., 35, 20, 21, ...
#[derive(Debug, Clone, PartialEq)]
pub struct CountingSensor {
    next: f64,
    min: f64,
    max: f64,
    step: f64,
}

impl Default for CountingSensor {
    fn default() -> Self {
        Self::new(20.0, 20.0, 35.0, 1.0)
    }
}

impl CountingSensor {
    pub fn new(start: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            next: start,
            min,
            max,
            step,
        }
    }

    /// Return the current value and advance
    pub fn advance(&mut self) -> f64 {
        let value = self.next;
        self.next += self.step;
        if self.next > self.max {
            self.next = self.min;
        }
        value
    }
}

#[async_trait]
impl SensorSource for CountingSensor {
    async fn next_value(&mut self) -> Result<f64, SensorError> {
        Ok(self.advance())
    }
}

//! Retry policy and cancellable waits
//!
//! Every blocking wait in the publisher (network attach polling, broker
//! handshake backoff, the publish period) goes through this module so that
//! it can be bounded by a [`RetryPolicy`] and interrupted by a
//! [`CancellationToken`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry configuration shared by the network and broker sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (None = unlimited)
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Custom backoff pattern in milliseconds, indexed by attempt number
    #[serde(default, rename = "backoff_ms")]
    pub backoff_pattern: Vec<u64>,
    /// Delay to use once the pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
}

fn default_sustained_delay() -> u64 {
    5000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(default_sustained_delay())
    }
}

impl RetryPolicy {
    /// Unlimited attempts with a constant delay between them
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: Vec::new(),
            sustained_delay_ms: delay_ms,
        }
    }

    /// Cap the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Calculate the delay that follows a failed `attempt` (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay_ms)
    }

    /// Total time spent sleeping before giving up.
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Decide what happens after `attempts_made` failed attempts (pure function)
    pub fn decide(&self, attempts_made: u32, cancelled: bool) -> RetryDecision {
        if cancelled {
            return RetryDecision::AbortCancelled;
        }

        if let Some(max_attempts) = self.max_attempts {
            if attempts_made >= max_attempts {
                return RetryDecision::AbortMaxAttemptsExceeded;
            }
        }

        RetryDecision::Proceed {
            attempt: attempts_made + 1,
            delay_ms: self.calculate_backoff_delay(attempts_made),
        }
    }

    /// Validate policy values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or unset for unlimited".to_string());
        }
        Ok(())
    }

    /// Human-readable attempt ceiling for log lines
    pub fn max_display(&self) -> String {
        self.max_attempts
            .map_or("∞".to_string(), |max| max.to_string())
    }
}

/// Outcome of a retry decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay_ms`, then make attempt number `attempt`
    Proceed { attempt: u32, delay_ms: u64 },
    /// Cancellation was requested
    AbortCancelled,
    /// The policy's attempt ceiling was reached
    AbortMaxAttemptsExceeded,
}

/// Sleep for `delay`, waking early on cancellation.
/// Returns true if the sleep completed, false if cancelled
pub async fn interruptible_sleep(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Cancellation requested during wait");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

//! Broker session: connect, reconnect-on-demand and publish
//!
//! The session is the only owner of its transport and of the
//! [`ConnectionState`]. State changes happen inside `ensure_connected`,
//! `publish` and `disconnect`; no background task writes to it.

use super::mqtt::{ConnectionEvent, ConnectionState, HealthMonitor};
use super::{BrokerCredentials, BrokerTarget, BrokerTransport, PublishOptions};
use crate::observability::metrics::metrics;
use crate::retry::{interruptible_sleep, RetryDecision, RetryPolicy};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Everything needed to (re)establish the broker connection
#[derive(Debug, Clone)]
pub struct BrokerSessionConfig {
    pub target: BrokerTarget,
    pub client_id: String,
    pub credentials: Option<BrokerCredentials>,
    pub retry: RetryPolicy,
    /// Keep retrying when the broker rejects the credentials
    pub retry_auth_failures: bool,
}

impl BrokerSessionConfig {
    pub fn new(target: BrokerTarget, client_id: impl Into<String>) -> Self {
        Self {
            target,
            client_id: client_id.into(),
            credentials: None,
            retry: RetryPolicy::default(),
            retry_auth_failures: false,
        }
    }

    pub fn with_credentials(mut self, credentials: BrokerCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Broker session errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker connection cancelled")]
    Cancelled,
    #[error("Broker unreachable after {attempts} handshake attempts, rc={last_code}")]
    AttemptsExhausted { attempts: u32, last_code: i32 },
    #[error("Broker rejected credentials, rc={code}")]
    AuthRejected { code: i32 },
}

/// Result of handing a message to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport accepted the message
    Sent,
    /// The transport refused the message; it is not retried
    Dropped,
}

/// Owns a [`BrokerTransport`] and its connection state
pub struct BrokerSession<T> {
    transport: T,
    config: BrokerSessionConfig,
    state: ConnectionState,
    target_set: bool,
}

impl<T: BrokerTransport> BrokerSession<T> {
    pub fn new(transport: T, config: BrokerSessionConfig) -> Self {
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            target_set: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &BrokerSessionConfig {
        &self.config
    }

    /// Connected according to both the session and the transport's liveness check
    pub fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(self.state) && self.transport.connected()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn transition(&mut self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(self.state, &event);
        HealthMonitor::log_state_transition(self.state, next, &event);
        self.state = next;
    }

    /// Make sure the session is connected, performing handshakes as needed.
    ///
    /// A no-op when already connected and alive. Otherwise handshakes are
    /// retried under the session's [`RetryPolicy`]; an auth rejection stops
    /// immediately unless `retry_auth_failures` is set.
    pub async fn ensure_connected(&mut self, cancel: &CancellationToken) -> Result<(), BrokerError> {
        if self.state == ConnectionState::Connected {
            if self.transport.connected() {
                return Ok(());
            }
            self.transition(ConnectionEvent::LivenessLost);
        }

        if !self.target_set {
            self.transport.set_target(self.config.target.clone());
            self.target_set = true;
        }

        let span = crate::mqtt_span!(
            broker = %self.config.target,
            client_id = %self.config.client_id
        );
        self.handshake_loop(cancel).instrument(span).await
    }

    async fn handshake_loop(&mut self, cancel: &CancellationToken) -> Result<(), BrokerError> {
        self.transition(ConnectionEvent::HandshakeStarted);
        if let Some(max_wait_ms) = self.config.retry.calculate_max_total_time() {
            debug!(max_wait_ms, "Handshake retries are bounded");
        }

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return self.abandon(BrokerError::Cancelled);
            }

            attempts += 1;
            metrics().handshake_attempted();
            info!(
                attempt = attempts,
                max = %self.config.retry.max_display(),
                "Attempting MQTT connection"
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.transport.connect(
                    &self.config.client_id,
                    self.config.credentials.as_ref(),
                ) => Some(result),
            };

            let failure = match outcome {
                None => return self.abandon(BrokerError::Cancelled),
                Some(Ok(())) => {
                    metrics().connection_established();
                    self.transition(ConnectionEvent::HandshakeSucceeded);
                    return Ok(());
                }
                Some(Err(failure)) => failure,
            };

            metrics().handshake_failed();
            warn!(
                attempt = attempts,
                code = failure.code,
                kind = ?failure.kind,
                detail = %failure.detail,
                "MQTT connection failed"
            );

            if failure.is_auth() && !self.config.retry_auth_failures {
                return self.abandon(BrokerError::AuthRejected { code: failure.code });
            }

            match self.config.retry.decide(attempts, cancel.is_cancelled()) {
                RetryDecision::Proceed { attempt, delay_ms } => {
                    info!(next_attempt = attempt, delay_ms, "Retrying MQTT connection");
                    if !interruptible_sleep(cancel, Duration::from_millis(delay_ms)).await {
                        return self.abandon(BrokerError::Cancelled);
                    }
                }
                RetryDecision::AbortCancelled => return self.abandon(BrokerError::Cancelled),
                RetryDecision::AbortMaxAttemptsExceeded => {
                    return self.abandon(BrokerError::AttemptsExhausted {
                        attempts,
                        last_code: failure.code,
                    });
                }
            }
        }
    }

    fn abandon(&mut self, error: BrokerError) -> Result<(), BrokerError> {
        self.transition(ConnectionEvent::HandshakeAbandoned);
        Err(error)
    }

    /// Publish `payload` to `topic`, reconnecting first if the session dropped.
    ///
    /// Only a failed reconnect is an error. A message the transport refuses
    /// is dropped, not retried, and leaves the session `Disconnected` so the
    /// next publish re-handshakes.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, BrokerError> {
        if !self.is_connected() {
            self.ensure_connected(cancel).await?;
        }

        let size = payload.len();
        match self.transport.publish(topic, payload, options).await {
            Ok(()) => {
                metrics().message_published();
                debug!(topic = %topic, bytes = size, retain = options.retain, "Published");
                Ok(PublishOutcome::Sent)
            }
            Err(e) => {
                metrics().publish_failed();
                warn!(topic = %topic, error = %e, "Publish dropped");
                self.transition(ConnectionEvent::PublishFailed(e.to_string()));
                Ok(PublishOutcome::Dropped)
            }
        }
    }

    /// Close the broker connection
    pub async fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected || self.transport.connected() {
            self.transport.disconnect().await;
        }
        self.transition(ConnectionEvent::Closed);
    }
}

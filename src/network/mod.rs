//! Network attachment
//!
//! [`NetworkSession`] drives a [`NetworkLink`] from `Unattached` to
//! `Attached`: it sets the link's identity, requests attachment, then polls
//! the link status under a [`RetryPolicy`] until it reports `Attached`.
//! The identity is always set before attachment begins because many links
//! only latch the hostname at attach time.

pub mod host;

pub use host::HostNetworkLink;

use crate::observability::metrics::metrics;
use crate::retry::{interruptible_sleep, RetryDecision, RetryPolicy};
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attachment state of the network link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Unattached,
    Attaching,
    Attached,
}

/// Credentials used to join the network
#[derive(Clone, Default, PartialEq)]
pub struct NetworkCredentials {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Network attachment errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Network attach cancelled")]
    Cancelled,
    #[error("Network not attached after {attempts} status checks")]
    AttemptsExhausted { attempts: u32 },
    #[error("Network link rejected attach request: {0}")]
    AttachRejected(String),
    #[error("Failed to resolve reach address: {0}")]
    Resolve(String),
}

/// External network layer
#[async_trait]
pub trait NetworkLink: Send {
    /// Set the hostname the link reports to the network
    fn set_identity(&mut self, hostname: &str);

    /// Request attachment; completion is observed through [`NetworkLink::status`]
    async fn begin_attach(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError>;

    /// Current link status
    async fn status(&mut self) -> NetworkState;

    /// Address acquired by the link, once attached
    fn local_address(&self) -> Option<IpAddr>;
}

/// Owns the network link and its attachment state
pub struct NetworkSession<L> {
    link: L,
    hostname: String,
    credentials: NetworkCredentials,
    policy: RetryPolicy,
    state: NetworkState,
}

impl<L: NetworkLink> NetworkSession<L> {
    pub fn new(
        link: L,
        hostname: impl Into<String>,
        credentials: NetworkCredentials,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            link,
            hostname: hostname.into(),
            credentials,
            policy,
            state: NetworkState::Unattached,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == NetworkState::Attached
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.link.local_address()
    }

    /// Access the underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Attach to the network, polling until the link reports `Attached`.
    ///
    /// Waits forever under the default policy; a `max_attempts` ceiling or
    /// cancellation ends the wait with an error.
    pub async fn attach(&mut self, cancel: &CancellationToken) -> Result<(), NetworkError> {
        if self.state == NetworkState::Attached
            && self.link.status().await == NetworkState::Attached
        {
            debug!(hostname = %self.hostname, "Network already attached");
            return Ok(());
        }

        self.link.set_identity(&self.hostname);
        self.state = NetworkState::Attaching;
        info!(
            hostname = %self.hostname,
            ssid = self.credentials.ssid.as_deref().unwrap_or("-"),
            "Attaching to network"
        );

        if let Err(e) = self.link.begin_attach(&self.credentials).await {
            self.state = NetworkState::Unattached;
            return Err(e);
        }

        let mut checks = 0u32;
        loop {
            checks += 1;
            metrics().network_status_checked();

            if self.link.status().await == NetworkState::Attached {
                self.state = NetworkState::Attached;
                metrics().network_attached();
                match self.link.local_address() {
                    Some(address) => info!(
                        hostname = %self.hostname,
                        address = %address,
                        checks,
                        "Connected to network"
                    ),
                    None => info!(hostname = %self.hostname, checks, "Connected to network"),
                }
                return Ok(());
            }

            match self.policy.decide(checks, cancel.is_cancelled()) {
                RetryDecision::Proceed { delay_ms, .. } => {
                    debug!(checks, delay_ms, "Network not attached yet");
                    if !interruptible_sleep(cancel, Duration::from_millis(delay_ms)).await {
                        self.state = NetworkState::Unattached;
                        return Err(NetworkError::Cancelled);
                    }
                }
                RetryDecision::AbortCancelled => {
                    self.state = NetworkState::Unattached;
                    return Err(NetworkError::Cancelled);
                }
                RetryDecision::AbortMaxAttemptsExceeded => {
                    warn!(checks, "Giving up on network attach");
                    self.state = NetworkState::Unattached;
                    return Err(NetworkError::AttemptsExhausted { attempts: checks });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{LinkCall, MockNetworkLink};

    fn session(link: MockNetworkLink, policy: RetryPolicy) -> NetworkSession<MockNetworkLink> {
        NetworkSession::new(
            link,
            "test-node",
            NetworkCredentials {
                ssid: Some("home".to_string()),
                password: Some("secret".to_string()),
            },
            policy,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_is_set_before_attach() {
        let link = MockNetworkLink::attached_after(0);
        let mut session = session(link, RetryPolicy::fixed(500));

        session.attach(&CancellationToken::new()).await.unwrap();

        let calls = session.link().calls();
        assert_eq!(calls[0], LinkCall::SetIdentity("test-node".to_string()));
        assert_eq!(calls[1], LinkCall::BeginAttach);
        assert_eq!(session.state(), NetworkState::Attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_fixed_interval_until_attached() {
        let link = MockNetworkLink::attached_after(3);
        let mut session = session(link, RetryPolicy::fixed(500));

        let start = tokio::time::Instant::now();
        session.attach(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.link().status_checks(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2000), "waited {elapsed:?}");
        assert!(session.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_surfaces_error() {
        let link = MockNetworkLink::never_attached();
        let mut session = session(link, RetryPolicy::fixed(500).with_max_attempts(4));

        let result = session.attach(&CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(NetworkError::AttemptsExhausted { attempts: 4 })
        ));
        assert_eq!(session.state(), NetworkState::Unattached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_wait() {
        let link = MockNetworkLink::never_attached();
        let mut session = session(link, RetryPolicy::fixed(500));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let result = session.attach(&cancel).await;

        assert!(matches!(result, Err(NetworkError::Cancelled)));
    }

    #[tokio::test]
    async fn test_rejected_attach_is_returned() {
        let link = MockNetworkLink::rejecting("bad password");
        let mut session = session(link, RetryPolicy::fixed(500));

        let result = session.attach(&CancellationToken::new()).await;

        assert!(matches!(result, Err(NetworkError::AttachRejected(_))));
        assert_eq!(session.state(), NetworkState::Unattached);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = NetworkCredentials {
            ssid: Some("home".to_string()),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("home"));
    }
}

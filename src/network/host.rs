//! Network link for hosts whose networking is managed by the operating system
//!
//! There is nothing to join on a regular host, so "attached" means a route to
//! the reach address exists: a UDP socket connected to it (no packets are
//! sent) receives a non-unspecified local address.

use super::{NetworkCredentials, NetworkError, NetworkLink, NetworkState};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// [`NetworkLink`] backed by the host's routing table
#[derive(Debug, Clone)]
pub struct HostNetworkLink {
    reach_target: String,
    identity: Option<String>,
    attach_requested: bool,
    local: Option<IpAddr>,
}

impl HostNetworkLink {
    /// `reach_target` is a `host:port` pair, usually the broker address
    pub fn new(reach_target: impl Into<String>) -> Self {
        Self {
            reach_target: reach_target.into(),
            identity: None,
            attach_requested: false,
            local: None,
        }
    }

    /// Identity reported by this link
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    async fn resolve_reach_target(&self) -> Result<SocketAddr, NetworkError> {
        tokio::net::lookup_host(&self.reach_target)
            .await
            .map_err(|e| NetworkError::Resolve(format!("{}: {e}", self.reach_target)))?
            .next()
            .ok_or_else(|| NetworkError::Resolve(format!("{}: no addresses", self.reach_target)))
    }

    async fn route_source(target: SocketAddr) -> std::io::Result<IpAddr> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        Ok(socket.local_addr()?.ip())
    }
}

#[async_trait]
impl NetworkLink for HostNetworkLink {
    fn set_identity(&mut self, hostname: &str) {
        self.identity = Some(hostname.to_string());
    }

    async fn begin_attach(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError> {
        if credentials.ssid.is_some() {
            debug!("Host networking is managed by the operating system, ignoring ssid");
        }
        self.attach_requested = true;
        self.local = None;
        Ok(())
    }

    async fn status(&mut self) -> NetworkState {
        if !self.attach_requested {
            return NetworkState::Unattached;
        }

        let target = match self.resolve_reach_target().await {
            Ok(target) => target,
            Err(e) => {
                debug!(error = %e, "Reach address not resolvable yet");
                return NetworkState::Attaching;
            }
        };

        match Self::route_source(target).await {
            Ok(ip) if !ip.is_unspecified() => {
                self.local = Some(ip);
                NetworkState::Attached
            }
            Ok(_) => NetworkState::Attaching,
            Err(e) => {
                debug!(error = %e, target = %target, "No route to reach address");
                NetworkState::Attaching
            }
        }
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.local
    }
}

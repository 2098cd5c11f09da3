//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and event loop. A handshake polls the
//! event loop inline until CONNACK; after that a driver task keeps polling so
//! keep-alives flow, and clears the connected flag on the first error. The
//! driver never reconnects on its own: [`BrokerSession`] does that on demand.
//!
//! [`BrokerSession`]: crate::transport::BrokerSession

use super::connection::{
    classify_return_code, configure_mqtt_options, to_wire_qos, ConnectionState, MqttError,
    MqttSettings,
};
use super::health_monitor::HealthMonitor;
use crate::observability::metrics::metrics;
use crate::transport::{
    BrokerCredentials, BrokerTarget, BrokerTransport, HandshakeFailure, PublishOptions,
    CODE_CONNECTED, CODE_CONNECTION_LOST, CODE_CONNECT_FAILED, CODE_DISCONNECTED,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection health shared between the transport and its driver task
#[derive(Debug, Default)]
struct LinkHealth {
    connected: AtomicBool,
    closing: AtomicBool,
    last_inbound: Mutex<Option<Instant>>,
}

impl LinkHealth {
    fn established() -> Self {
        let health = Self::default();
        health.connected.store(true, Ordering::SeqCst);
        health.touch();
        health
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_inbound.lock() {
            *last = Some(Instant::now());
        }
    }

    fn mark_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_flagged(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn since_last_inbound(&self) -> Option<Duration> {
        self.last_inbound
            .lock()
            .ok()
            .and_then(|last| last.map(|at| at.elapsed()))
    }
}

/// rumqttc-backed [`BrokerTransport`]
pub struct MqttTransport {
    settings: MqttSettings,
    target: Option<BrokerTarget>,
    client: Option<AsyncClient>,
    health: Arc<LinkHealth>,
    driver_handle: Option<JoinHandle<()>>,
    driver_stop: CancellationToken,
    keep_alive: Duration,
    last_error_code: i32,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            target: None,
            client: None,
            health: Arc::new(LinkHealth::default()),
            driver_handle: None,
            driver_stop: CancellationToken::new(),
            keep_alive: settings.keep_alive,
            last_error_code: CODE_DISCONNECTED,
            settings,
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    pub fn target(&self) -> Option<&BrokerTarget> {
        self.target.as_ref()
    }

    /// Keep-alive in force: the broker's Server Keep Alive if it sent one
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Transport-level view of the connection
    pub fn connection_state(&self) -> ConnectionState {
        if self.connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Poll the event loop until the broker answers the CONNECT.
    ///
    /// Returns the keep-alive the session runs with.
    async fn await_connack(
        event_loop: &mut EventLoop,
        requested_keep_alive: Duration,
    ) -> Result<Duration, HandshakeFailure> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    classify_return_code(connack.code)?;
                    let keep_alive = connack
                        .properties
                        .and_then(|properties| properties.server_keep_alive)
                        .map(|secs| Duration::from_secs(u64::from(secs)))
                        .unwrap_or(requested_keep_alive);
                    return Ok(keep_alive);
                }
                Ok(event) => {
                    debug!(target: "mqtt_transport", "Handshake event: {:?}", event);
                }
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(classify_return_code(code).err().unwrap_or_else(|| {
                        HandshakeFailure::refused(CODE_CONNECT_FAILED, "broker refused connection")
                    }));
                }
                Err(ConnectionError::Timeout(_)) => return Err(HandshakeFailure::timeout()),
                Err(e) => return Err(HandshakeFailure::unreachable(e.to_string())),
            }
        }
    }

    /// Keep the event loop turning after the handshake
    fn spawn_driver(
        mut event_loop: EventLoop,
        health: Arc<LinkHealth>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = event_loop.poll() => match event {
                        Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                            health.mark_lost();
                            metrics().connection_lost();
                            warn!(reason = ?disconnect.reason_code, "Broker closed the connection");
                            break;
                        }
                        Ok(Event::Incoming(_)) => health.touch(),
                        Ok(Event::Outgoing(_)) => {}
                        Err(e) => {
                            health.mark_lost();
                            if health.closing.load(Ordering::SeqCst) {
                                debug!(target: "mqtt_transport", "Event loop closed: {}", e);
                            } else {
                                metrics().connection_lost();
                                warn!(code = CODE_CONNECTION_LOST, error = %e, "MQTT connection lost");
                            }
                            break;
                        }
                    }
                }
            }
            debug!(target: "mqtt_transport", "MQTT driver stopped");
        })
    }

    /// Stop the driver of the previous connection without a DISCONNECT
    fn teardown(&mut self) {
        self.health.mark_lost();
        self.driver_stop.cancel();
        if let Some(handle) = self.driver_handle.take() {
            handle.abort();
        }
        self.client = None;
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    fn set_target(&mut self, target: BrokerTarget) {
        self.target = Some(target);
    }

    async fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&BrokerCredentials>,
    ) -> Result<(), HandshakeFailure> {
        self.teardown();

        let target = match self.target.clone() {
            Some(target) => target,
            None => {
                let failure = HandshakeFailure::unreachable("no broker target set");
                self.last_error_code = failure.code;
                return Err(failure);
            }
        };

        let options = configure_mqtt_options(client_id, &target, credentials, &self.settings);
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        let outcome = tokio::time::timeout(
            self.settings.connect_timeout,
            Self::await_connack(&mut event_loop, self.settings.keep_alive),
        )
        .await
        .unwrap_or_else(|_| Err(HandshakeFailure::timeout()));

        let keep_alive = match outcome {
            Ok(keep_alive) => keep_alive,
            Err(failure) => {
                self.last_error_code = failure.code;
                return Err(failure);
            }
        };
        if keep_alive != self.settings.keep_alive {
            debug!(
                target: "mqtt_transport",
                requested = ?self.settings.keep_alive,
                granted = ?keep_alive,
                "Broker overrode keep-alive"
            );
        }

        let health = Arc::new(LinkHealth::established());
        let stop = CancellationToken::new();
        self.driver_handle = Some(Self::spawn_driver(
            event_loop,
            health.clone(),
            stop.clone(),
        ));
        self.health = health;
        self.driver_stop = stop;
        self.client = Some(client);
        self.keep_alive = keep_alive;
        self.last_error_code = CODE_CONNECTED;

        info!(broker = %target, client_id = %client_id, "MQTT handshake complete");
        Ok(())
    }

    fn connected(&self) -> bool {
        self.client.is_some()
            && HealthMonitor::is_alive(
                self.settings.liveness,
                self.health.is_flagged(),
                self.health.since_last_inbound(),
                self.keep_alive,
            )
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), MqttError> {
        if !self.connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }

        let client = self.client.as_ref().ok_or(MqttError::NotConnected {
            state: ConnectionState::Disconnected,
        })?;

        client
            .publish(topic, to_wire_qos(options.qos), options.retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn last_error_code(&self) -> i32 {
        if self.last_error_code == CODE_CONNECTED && !self.health.is_flagged() {
            CODE_CONNECTION_LOST
        } else {
            self.last_error_code
        }
    }

    async fn disconnect(&mut self) {
        self.health.closing.store(true, Ordering::SeqCst);

        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!(target: "mqtt_transport", "DISCONNECT not queued: {}", e);
            }
        }

        if let Some(handle) = self.driver_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!(target: "mqtt_transport", "Driver shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Driver task ended with error: {}", e),
                Err(_) => warn!("Driver didn't shut down gracefully, forcing abort"),
                _ => {}
            }
        }

        self.driver_stop.cancel();
        self.health.mark_lost();
        self.last_error_code = CODE_DISCONNECTED;
        info!("MQTT transport disconnected");
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver_stop.cancel();
        if let Some(handle) = self.driver_handle.take() {
            handle.abort();
        }
    }
}

//! Mock implementations for testing
//!
//! Provides mock network link, broker transport and sensor source
//! implementations so the publisher can be tested without a network or a
//! broker. Every mock is cheaply cloneable: clones share state, so a test can
//! keep a handle after moving the mock into a session.

use crate::network::{NetworkCredentials, NetworkError, NetworkLink, NetworkState};
use crate::sensor::{SensorError, SensorSource};
use crate::transport::{
    BrokerCredentials, BrokerTarget, BrokerTransport, HandshakeFailure, MqttError, PublishOptions,
    CODE_CONNECTED, CODE_DISCONNECTED,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Calls observed by [`MockNetworkLink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    SetIdentity(String),
    BeginAttach,
}

#[derive(Debug, Default)]
struct LinkState {
    calls: Vec<LinkCall>,
    identity: Option<String>,
    pending_checks: Option<usize>,
    status_checks: usize,
    reject: Option<String>,
}

/// Mock network link with a scripted number of not-yet-attached polls
#[derive(Debug, Clone, Default)]
pub struct MockNetworkLink {
    state: Arc<Mutex<LinkState>>,
    attached: Arc<AtomicBool>,
}

impl MockNetworkLink {
    /// Reports `Attaching` for `checks` polls, then `Attached`
    pub fn attached_after(checks: usize) -> Self {
        let link = Self::default();
        lock(&link.state).pending_checks = Some(checks);
        link
    }

    /// Never reports `Attached`
    pub fn never_attached() -> Self {
        Self::default()
    }

    /// Refuses the attach request
    pub fn rejecting(reason: &str) -> Self {
        let link = Self::default();
        lock(&link.state).reject = Some(reason.to_string());
        link
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        lock(&self.state).calls.clone()
    }

    pub fn identity(&self) -> Option<String> {
        lock(&self.state).identity.clone()
    }

    pub fn status_checks(&self) -> usize {
        lock(&self.state).status_checks
    }

    /// Flag that turns true once the link has reported `Attached`
    pub fn attached_flag(&self) -> Arc<AtomicBool> {
        self.attached.clone()
    }
}

#[async_trait]
impl NetworkLink for MockNetworkLink {
    fn set_identity(&mut self, hostname: &str) {
        let mut state = lock(&self.state);
        state.calls.push(LinkCall::SetIdentity(hostname.to_string()));
        state.identity = Some(hostname.to_string());
    }

    async fn begin_attach(&mut self, _credentials: &NetworkCredentials) -> Result<(), NetworkError> {
        let mut state = lock(&self.state);
        state.calls.push(LinkCall::BeginAttach);
        match &state.reject {
            Some(reason) => Err(NetworkError::AttachRejected(reason.clone())),
            None => Ok(()),
        }
    }

    async fn status(&mut self) -> NetworkState {
        let mut state = lock(&self.state);
        state.status_checks += 1;

        if !state.calls.contains(&LinkCall::BeginAttach) {
            return NetworkState::Unattached;
        }

        match state.pending_checks.as_mut() {
            Some(0) => {
                self.attached.store(true, Ordering::SeqCst);
                NetworkState::Attached
            }
            Some(remaining) => {
                *remaining -= 1;
                NetworkState::Attaching
            }
            None => NetworkState::Attaching,
        }
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.attached
            .load(Ordering::SeqCst)
            .then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 254, 42)))
    }
}

/// Calls observed by [`MockBrokerTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    SetTarget(BrokerTarget),
    Connect {
        client_id: String,
        username: Option<String>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnect,
}

/// A message the mock transport accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

#[derive(Debug)]
struct BrokerState {
    calls: Vec<BrokerCall>,
    published: Vec<PublishedMessage>,
    script: VecDeque<Result<(), HandshakeFailure>>,
    failures_remaining: usize,
    failing_publishes: usize,
    connect_times: Vec<Instant>,
    guard_violations: usize,
    last_error_code: i32,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            published: Vec::new(),
            script: VecDeque::new(),
            failures_remaining: 0,
            failing_publishes: 0,
            connect_times: Vec::new(),
            guard_violations: 0,
            last_error_code: CODE_DISCONNECTED,
        }
    }
}

/// Mock broker transport with scripted handshake outcomes
#[derive(Debug, Clone, Default)]
pub struct MockBrokerTransport {
    state: Arc<Mutex<BrokerState>>,
    connected: Arc<AtomicBool>,
    network_guard: Option<Arc<AtomicBool>>,
}

impl MockBrokerTransport {
    /// Every handshake succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `failures` handshakes fail as unreachable
    pub fn failing_then_ok(failures: usize) -> Self {
        let transport = Self::default();
        lock(&transport.state).failures_remaining = failures;
        transport
    }

    /// Handshakes return `script` in order, then succeed
    pub fn with_script(script: Vec<Result<(), HandshakeFailure>>) -> Self {
        let transport = Self::default();
        lock(&transport.state).script = script.into();
        transport
    }

    /// Fail any handshake made while `network_attached` is false
    pub fn with_network_guard(mut self, network_attached: Arc<AtomicBool>) -> Self {
        self.network_guard = Some(network_attached);
        self
    }

    /// Simulate the broker going away silently
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// The next `count` publishes are refused
    pub fn fail_next_publishes(&self, count: usize) {
        lock(&self.state).failing_publishes = count;
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        lock(&self.state).calls.clone()
    }

    pub fn handshake_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, BrokerCall::Connect { .. }))
            .count()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        lock(&self.state).connect_times.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    /// Handshakes attempted while the network guard was down
    pub fn guard_violations(&self) -> usize {
        lock(&self.state).guard_violations
    }
}

#[async_trait]
impl BrokerTransport for MockBrokerTransport {
    fn set_target(&mut self, target: BrokerTarget) {
        lock(&self.state).calls.push(BrokerCall::SetTarget(target));
    }

    async fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&BrokerCredentials>,
    ) -> Result<(), HandshakeFailure> {
        let mut state = lock(&self.state);
        state.calls.push(BrokerCall::Connect {
            client_id: client_id.to_string(),
            username: credentials.map(|c| c.username.clone()),
        });
        state.connect_times.push(Instant::now());
        self.connected.store(false, Ordering::SeqCst);

        let network_down = self
            .network_guard
            .as_ref()
            .is_some_and(|attached| !attached.load(Ordering::SeqCst));

        let outcome = if network_down {
            state.guard_violations += 1;
            Err(HandshakeFailure::unreachable("network not attached"))
        } else if let Some(scripted) = state.script.pop_front() {
            scripted
        } else if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            Err(HandshakeFailure::unreachable("connection refused"))
        } else {
            Ok(())
        };

        match &outcome {
            Ok(()) => {
                state.last_error_code = CODE_CONNECTED;
                self.connected.store(true, Ordering::SeqCst);
            }
            Err(failure) => state.last_error_code = failure.code,
        }
        outcome
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), MqttError> {
        let mut state = lock(&self.state);
        state.calls.push(BrokerCall::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
            retain: options.retain,
        });

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            self.connected.store(false, Ordering::SeqCst);
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }

        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retain: options.retain,
        });
        Ok(())
    }

    fn last_error_code(&self) -> i32 {
        lock(&self.state).last_error_code
    }

    async fn disconnect(&mut self) {
        lock(&self.state).calls.push(BrokerCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Sensor returning scripted readings; `None` entries fail the read.
/// The script repeats once exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    readings: Arc<Vec<Option<f64>>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new(readings: Vec<Option<f64>>) -> Self {
        Self {
            readings: Arc::new(readings),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always returns `value`
    pub fn constant(value: f64) -> Self {
        Self::new(vec![Some(value)])
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for ScriptedSensor {
    async fn next_value(&mut self) -> Result<f64, SensorError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.readings.is_empty() {
            return Err(SensorError::Parse {
                raw: "empty script".to_string(),
            });
        }

        match self.readings[read % self.readings.len()] {
            Some(value) => Ok(value),
            None => Err(SensorError::Parse {
                raw: "scripted failure".to_string(),
            }),
        }
    }
}

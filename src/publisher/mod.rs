//! Sensor publisher lifecycle
//!
//! Startup runs strictly in order, each step finishing before the next:
//! attach the network, connect the broker, announce every sensor with one
//! discovery message. The steady-state loop then reads each sensor, encodes
//! its state, publishes it (reconnecting first if the broker session dropped)
//! and sleeps for the configured interval.

use crate::config::PublisherConfig;
use crate::error::PublisherResult;
use crate::network::{NetworkLink, NetworkSession};
use crate::observability::metrics::metrics;
use crate::protocol::{PayloadCodec, SensorDescriptor, DOMOTICZ_IN_TOPIC};
use crate::retry::interruptible_sleep;
use crate::sensor::{ensure_finite, SensorSource};
use crate::transport::{BrokerSession, BrokerTransport, PublishOptions, PublishOutcome};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Publish loop behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSettings {
    /// Fixed sleep between cycles
    pub interval: Duration,
    /// Announce sensors at startup
    pub discovery: bool,
    /// Retain discovery messages on the broker
    pub retain_discovery: bool,
    /// Options for state messages
    pub publish: PublishOptions,
    pub codec: PayloadCodec,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            discovery: true,
            retain_discovery: false,
            publish: PublishOptions::default(),
            codec: PayloadCodec::default(),
        }
    }
}

/// What one publish cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages accepted by the transport
    pub published: usize,
    /// Messages the transport refused
    pub dropped: usize,
    /// Sensors whose reading failed this cycle
    pub skipped: usize,
}

impl CycleReport {
    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Sent => self.published += 1,
            PublishOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// A descriptor and the source that feeds it
struct PublishedSensor {
    descriptor: SensorDescriptor,
    source: Box<dyn SensorSource>,
}

/// Orchestrates network, broker and sensors
pub struct SensorPublisher<L, T> {
    network: NetworkSession<L>,
    broker: BrokerSession<T>,
    settings: PublisherSettings,
    sensors: Vec<PublishedSensor>,
    cancel: CancellationToken,
    cycles: u64,
}

impl<L: NetworkLink, T: BrokerTransport> SensorPublisher<L, T> {
    pub fn new(
        network: NetworkSession<L>,
        broker: BrokerSession<T>,
        settings: PublisherSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            network,
            broker,
            settings,
            sensors: Vec::new(),
            cancel,
            cycles: 0,
        }
    }

    /// Build a publisher with every sensor from `config`, over the given link and transport
    pub fn from_config(
        config: &PublisherConfig,
        link: L,
        transport: T,
        cancel: CancellationToken,
    ) -> PublisherResult<Self> {
        let network = NetworkSession::new(
            link,
            config.network.hostname.clone(),
            config.network_credentials()?,
            config.network_policy(),
        );
        let broker = BrokerSession::new(transport, config.broker_session_config()?);

        let mut publisher = Self::new(network, broker, config.publisher_settings(), cancel);
        for (sensor, descriptor) in config.sensors.iter().zip(config.descriptors()) {
            publisher.add_sensor(descriptor, sensor.source.build());
        }
        Ok(publisher)
    }

    /// Register a sensor; it is announced and published from the next startup/cycle
    pub fn add_sensor(&mut self, descriptor: SensorDescriptor, source: Box<dyn SensorSource>) {
        self.sensors.push(PublishedSensor { descriptor, source });
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.iter().map(|sensor| &sensor.descriptor)
    }

    pub fn network(&self) -> &NetworkSession<L> {
        &self.network
    }

    pub fn broker(&self) -> &BrokerSession<T> {
        &self.broker
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Completed publish cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Attach, connect and announce
    pub async fn start(&mut self) -> PublisherResult<()> {
        let span = crate::lifecycle_span!(hostname = %self.network.hostname());
        async {
            info!(sensors = self.sensors.len(), "Starting sensor publisher");

            self.network.attach(&self.cancel).await?;
            self.broker.ensure_connected(&self.cancel).await?;

            if self.settings.discovery {
                let announced = self.announce().await?;
                info!(announced, "Discovery messages published");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Publish one discovery message per sensor; returns how many were accepted
    pub async fn announce(&mut self) -> PublisherResult<usize> {
        let options = PublishOptions {
            qos: self.settings.publish.qos,
            retain: self.settings.retain_discovery,
        };

        let mut announced = 0;
        for sensor in &self.sensors {
            let descriptor = &sensor.descriptor;
            let payload = self.settings.codec.encode_discovery(descriptor);
            debug!(
                topic = %descriptor.config_topic(),
                payload = %String::from_utf8_lossy(&payload),
                "Discovery payload"
            );

            let outcome = self
                .broker
                .publish(descriptor.config_topic(), payload, options, &self.cancel)
                .await?;
            if outcome == PublishOutcome::Sent {
                metrics().discovery_published();
                announced += 1;
            }
        }
        Ok(announced)
    }

    /// Read, encode and publish every sensor once
    pub async fn run_cycle(&mut self) -> PublisherResult<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        for sensor in self.sensors.iter_mut() {
            let value = match sensor.source.next_value().await.and_then(ensure_finite) {
                Ok(value) => value,
                Err(e) => {
                    metrics().sensor_read_failed();
                    warn!(sensor = %sensor.descriptor.name(), error = %e, "Skipping sensor this cycle");
                    report.skipped += 1;
                    continue;
                }
            };
            sensor.descriptor.record(value);

            let descriptor = &sensor.descriptor;
            let payload = self.settings.codec.encode_state(descriptor);
            debug!(
                topic = %descriptor.state_topic(),
                payload = %String::from_utf8_lossy(&payload),
                "State payload"
            );
            let outcome = self
                .broker
                .publish(
                    descriptor.state_topic(),
                    payload,
                    self.settings.publish,
                    &self.cancel,
                )
                .await?;
            report.count(outcome);

            if let Some(idx) = descriptor.domoticz_idx() {
                let payload = self.settings.codec.encode_domoticz(idx, value);
                debug!(idx, payload = %String::from_utf8_lossy(&payload), "Domoticz payload");
                let outcome = self
                    .broker
                    .publish(DOMOTICZ_IN_TOPIC, payload, self.settings.publish, &self.cancel)
                    .await?;
                report.count(outcome);
            }
        }

        self.cycles += 1;
        metrics().cycle_completed(started.elapsed());
        Ok(report)
    }

    /// Start, then publish every interval until cancelled.
    ///
    /// Cancellation ends the loop with `Ok`; fatal broker or network errors
    /// are returned.
    pub async fn run(&mut self) -> PublisherResult<()> {
        match self.publish_loop().await {
            Err(e) if e.is_cancelled() => {
                info!(cycles = self.cycles, "Publisher cancelled");
                Ok(())
            }
            other => other,
        }
    }

    async fn publish_loop(&mut self) -> PublisherResult<()> {
        self.start().await?;

        while !self.cancel.is_cancelled() {
            let report = self.run_cycle().await?;
            if report.dropped > 0 || report.skipped > 0 {
                warn!(
                    cycle = self.cycles,
                    published = report.published,
                    dropped = report.dropped,
                    skipped = report.skipped,
                    "Cycle completed with losses"
                );
            } else {
                debug!(cycle = self.cycles, published = report.published, "Cycle completed");
            }

            if !interruptible_sleep(&self.cancel, self.settings.interval).await {
                break;
            }
        }

        info!(cycles = self.cycles, "Publisher cancelled");
        Ok(())
    }

    /// Disconnect from the broker and log final metrics
    pub async fn shutdown(&mut self) {
        self.broker.disconnect().await;

        let snapshot = metrics().snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(rendered) => info!(cycles = self.cycles, metrics = %rendered, "Publisher stopped"),
            Err(_) => info!(cycles = self.cycles, "Publisher stopped"),
        }
    }
}

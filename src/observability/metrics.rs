//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected window of cycle durations
//! for tracking network attach, broker session and publish statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cycle durations kept for percentile calculation
const CYCLE_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Network attach
    network_status_checks: AtomicU64,
    network_attached: AtomicBool,

    // Broker session
    mqtt_connected: AtomicBool,
    handshake_attempts: AtomicU64,
    handshake_failures: AtomicU64,
    connections_established: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Publishing
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    discovery_messages: AtomicU64,
    sensor_read_failures: AtomicU64,
    cycles_completed: AtomicU64,
    last_publish: AtomicU64,
    cycle_times: Mutex<Vec<u64>>, // in milliseconds

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            network_status_checks: AtomicU64::new(0),
            network_attached: AtomicBool::new(false),
            mqtt_connected: AtomicBool::new(false),
            handshake_attempts: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            discovery_messages: AtomicU64::new(0),
            sensor_read_failures: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            last_publish: AtomicU64::new(0),
            cycle_times: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Network metrics
    pub fn network_status_checked(&self) {
        self.network_status_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn network_attached(&self) {
        self.network_attached.store(true, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn handshake_attempted(&self) {
        self.handshake_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.last_publish
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    // Publisher metrics
    pub fn discovery_published(&self) {
        self.discovery_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sensor_read_failed(&self) {
        self.sensor_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_completed(&self, duration: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut times) = self.cycle_times.lock() {
            times.push(duration.as_millis() as u64);

            if times.len() > CYCLE_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Reset all metrics to initial state
    pub fn reset(&self) {
        for counter in [
            &self.network_status_checks,
            &self.handshake_attempts,
            &self.handshake_failures,
            &self.connections_established,
            &self.connections_lost,
            &self.connection_start_time,
            &self.messages_published,
            &self.publish_failures,
            &self.discovery_messages,
            &self.sensor_read_failures,
            &self.cycles_completed,
            &self.last_publish,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.network_attached.store(false, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.cycle_times.lock() {
            times.clear();
        }
    }

    /// Average, p50 and p95 cycle time (pure function over the window)
    fn cycle_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.cycle_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    fn connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.mqtt_connected.load(Ordering::Relaxed) && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_cycle_time_ms, cycle_time_p50_ms, cycle_time_p95_ms) =
            self.cycle_time_statistics();

        MetricsSnapshot {
            network: NetworkMetrics {
                attached: self.network_attached.load(Ordering::Relaxed),
                status_checks: self.network_status_checks.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                handshake_attempts: self.handshake_attempts.load(Ordering::Relaxed),
                handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            publisher: PublisherMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                discovery_messages: self.discovery_messages.load(Ordering::Relaxed),
                sensor_read_failures: self.sensor_read_failures.load(Ordering::Relaxed),
                cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
                last_publish: self.last_publish.load(Ordering::Relaxed),
                avg_cycle_time_ms,
                cycle_time_p50_ms,
                cycle_time_p95_ms,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub network: NetworkMetrics,
    pub mqtt: MqttMetrics,
    pub publisher: PublisherMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkMetrics {
    pub attached: bool,
    pub status_checks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub handshake_attempts: u64,
    pub handshake_failures: u64,
    pub connections_established: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub discovery_messages: u64,
    pub sensor_read_failures: u64,
    pub cycles_completed: u64,
    pub last_publish: u64,
    pub avg_cycle_time_ms: f64,
    pub cycle_time_p50_ms: f64,
    pub cycle_time_p95_ms: f64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}

//! Metrics fetching and derived values
//!
//! Given a Ready session, three independent query blocks are issued:
//! system resources, health sensors and interface byte counters (plus the
//! active-session count). A query-level failure only omits that block's
//! fields; a fatal session error aborts the whole fetch so the caller can
//! evict the pooled connection.
//!
//! Traffic rates are counter-based: the delta of monotonically increasing
//! byte counters over elapsed time, never an instantaneous measurement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{instrument, trace, warn};

use crate::DeviceMetrics;
use crate::config::DeviceConfig;
use crate::mgmt::session::{ManagedSession, SessionError};

/// Memory usage percent from total/free, guarded against total = 0.
pub fn memory_percent(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(free);
    used as f64 / total as f64 * 100.0
}

/// Byte delta over elapsed time as Mbps, rounded to 2 decimals.
pub fn to_mbps(delta_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let bps = delta_bytes as f64 * 8.0 / secs;
    round2(bps / 1_000_000.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rates derived from one counter observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficRates {
    pub rx_mbps: f64,
    pub tx_mbps: f64,
}

#[derive(Debug, Clone, Copy)]
struct CounterSnapshot {
    rx_bytes: u64,
    tx_bytes: u64,
    at: Instant,
}

/// Last observed byte counters per (device id, interface name).
///
/// Lives for the process lifetime; the first observation after a restart
/// has no baseline and yields 0 Mbps. A counter going backwards (device
/// reboot or counter wrap) also yields 0, but the cache is rebaselined to
/// the new values either way so the next cycle computes a real rate.
pub struct TrafficCache {
    entries: Mutex<HashMap<(String, String), CounterSnapshot>>,
}

impl TrafficCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an observation and return the rates it implies.
    pub fn observe(
        &self,
        device_id: &str,
        interface: &str,
        rx_bytes: u64,
        tx_bytes: u64,
        at: Instant,
    ) -> TrafficRates {
        let key = (device_id.to_string(), interface.to_string());
        let mut entries = self.entries.lock().expect("traffic cache poisoned");

        let rates = match entries.get(&key) {
            Some(prev)
                if rx_bytes >= prev.rx_bytes && tx_bytes >= prev.tx_bytes && at > prev.at =>
            {
                let elapsed = at - prev.at;
                TrafficRates {
                    rx_mbps: to_mbps(rx_bytes - prev.rx_bytes, elapsed),
                    tx_mbps: to_mbps(tx_bytes - prev.tx_bytes, elapsed),
                }
            }
            Some(_) => {
                trace!("{device_id}/{interface}: counter reset detected, rate 0");
                TrafficRates {
                    rx_mbps: 0.0,
                    tx_mbps: 0.0,
                }
            }
            None => TrafficRates {
                rx_mbps: 0.0,
                tx_mbps: 0.0,
            },
        };

        entries.insert(
            key,
            CounterSnapshot {
                rx_bytes,
                tx_bytes,
                at,
            },
        );

        rates
    }
}

impl Default for TrafficCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles the metrics bag for one device from a live session.
pub struct MetricsFetcher {
    traffic: TrafficCache,
}

impl MetricsFetcher {
    pub fn new() -> Self {
        Self {
            traffic: TrafficCache::new(),
        }
    }

    /// Fetch all metric blocks. Query-level failures are isolated; only a
    /// fatal session error propagates (and means the session must be
    /// evicted by the caller).
    #[instrument(skip(self, session, device), fields(device = %device.id))]
    pub async fn fetch(
        &self,
        session: &dyn ManagedSession,
        device: &DeviceConfig,
    ) -> Result<DeviceMetrics, SessionError> {
        let mut metrics = DeviceMetrics::default();

        match session.read_resource().await {
            Ok(resource) => {
                metrics.cpu_load = resource.cpu_load;
                metrics.memory_usage = resource
                    .total_memory
                    .zip(resource.free_memory)
                    .map(|(total, free)| memory_percent(total, free));
                metrics.uptime = resource.uptime;
                metrics.board_name = resource.board_name;
                metrics.version = resource.version;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("{}: resource block unavailable: {e}", device.id),
        }

        match session.read_health().await {
            Ok(health) => {
                metrics.temperature = health.temperature;
                metrics.voltage = health.voltage;
            }
            Err(e) if e.is_fatal() => return Err(e),
            // Common on models without sensors, not worth more than a trace.
            Err(e) => trace!("{}: health block unavailable: {e}", device.id),
        }

        if let Some(interface) = &device.interface {
            match session.read_interface_counters(interface).await {
                Ok(counters) => {
                    let rates = self.traffic.observe(
                        &device.id,
                        interface,
                        counters.rx_bytes,
                        counters.tx_bytes,
                        Instant::now(),
                    );
                    metrics.rx_rate = Some(rates.rx_mbps);
                    metrics.tx_rate = Some(rates.tx_mbps);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("{}: counter block unavailable: {e}", device.id),
            }
        }

        match session.read_active_sessions().await {
            Ok(count) => metrics.active_sessions = Some(count),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => trace!("{}: session count unavailable: {e}", device.id),
        }

        Ok(metrics)
    }
}

impl Default for MetricsFetcher {
    fn default() -> Self {
        Self::new()
    }
}

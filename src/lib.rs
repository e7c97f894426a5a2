pub mod alerts;
pub mod config;
pub mod fetcher;
pub mod mgmt;
pub mod poller;
pub mod probe;
pub mod publish;
pub mod store;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a device as determined by one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Reachable and (if managed) answering management queries
    Online,
    /// Reachable, but the management session could not be established
    Warning,
    /// Did not answer the liveness probe
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "ONLINE"),
            DeviceStatus::Warning => write!(f, "WARNING"),
            DeviceStatus::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Everything we managed to read from a device in one cycle.
///
/// Every field is optional: a ping-only device carries none of them, and a
/// managed device may be missing individual blocks (e.g. models without
/// health sensors).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetrics {
    /// CPU load (percent, 0-100)
    pub cpu_load: Option<f64>,

    /// Memory usage (percent, 0-100), derived from total/free
    pub memory_usage: Option<f64>,

    /// Board temperature (Celsius)
    pub temperature: Option<f64>,

    /// Supply voltage (Volts)
    pub voltage: Option<f64>,

    /// Transmit rate on the monitored interface (Mbps)
    pub tx_rate: Option<f64>,

    /// Receive rate on the monitored interface (Mbps)
    pub rx_rate: Option<f64>,

    /// Number of active sessions/connections
    pub active_sessions: Option<u64>,

    /// Device uptime as reported by the management protocol
    pub uptime: Option<String>,

    /// Hardware board name
    pub board_name: Option<String>,

    /// Firmware/OS version
    pub version: Option<String>,
}

impl DeviceMetrics {
    /// Identity fields destined for the inventory record, if any were read.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        if self.board_name.is_none() && self.version.is_none() && self.uptime.is_none() {
            return None;
        }

        Some(DeviceIdentity {
            board_name: self.board_name.clone(),
            version: self.version.clone(),
            uptime: self.uptime.clone(),
        })
    }
}

/// Slow-changing identity fields synced to the inventory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub board_name: Option<String>,
    pub version: Option<String>,
    pub uptime: Option<String>,
}

/// Outcome of polling a single device. Ephemeral - lives for one cycle.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub device_id: String,
    pub device_name: String,
    pub status: DeviceStatus,

    /// Probe round-trip time. `None` is the internal unreachable sentinel
    /// and must never leak into published payloads.
    pub latency: Option<Duration>,

    pub metrics: DeviceMetrics,
    pub timestamp: DateTime<Utc>,
}

impl PollResult {
    /// Latency in milliseconds as published: unreachable is normalized to 0.
    pub fn latency_ms(&self) -> f64 {
        self.latency
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

//! Store trait definitions
//!
//! All store implementations must be `Send + Sync` - they are shared
//! across the concurrent device tasks of a poll cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alerts::{AlertKind, Severity};
use crate::{DeviceIdentity, DeviceStatus};
use crate::config::DeviceConfig;

use super::error::StoreResult;

/// One time-series point: tags + whichever metric fields were present this
/// cycle. Points are buffered per cycle and written in a single batch, so a
/// point is never partially written across cycles.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    // === Tags ===
    pub device_id: String,
    pub device_name: String,

    pub timestamp: DateTime<Utc>,

    // === Fields (subset present this cycle) ===
    pub cpu_load: Option<f64>,
    pub memory_usage: Option<f64>,
    pub temperature: Option<f64>,
    pub voltage: Option<f64>,
    pub tx_rate: Option<f64>,
    pub rx_rate: Option<f64>,
    pub active_sessions: Option<u64>,
}

impl MetricPoint {
    /// Build a point from a poll result, carrying only the numeric fields.
    pub fn from_result(result: &crate::PollResult) -> Self {
        let m = &result.metrics;

        Self {
            device_id: result.device_id.clone(),
            device_name: result.device_name.clone(),
            timestamp: result.timestamp,
            cpu_load: m.cpu_load,
            memory_usage: m.memory_usage,
            temperature: m.temperature,
            voltage: m.voltage,
            tx_rate: m.tx_rate,
            rx_rate: m.rx_rate,
            active_sessions: m.active_sessions,
        }
    }
}

/// Device inventory: the system of record for devices, their last known
/// status and their alerts.
///
/// The polling engine reads one snapshot per cycle via `list_devices` and
/// writes back status and alert rows. All writes are best-effort: a failed
/// write is logged by the caller and retried implicitly on the next cycle.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Snapshot of all devices to poll this cycle.
    async fn list_devices(&self) -> StoreResult<Vec<DeviceConfig>>;

    /// Update status, last-seen timestamp and (when available) identity
    /// fields for a device.
    async fn update_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        last_seen: DateTime<Utc>,
        identity: Option<&DeviceIdentity>,
    ) -> StoreResult<()>;

    /// Insert an alert unless an active alert of the same (device, kind)
    /// already exists. Returns whether a row was inserted, making the
    /// raise idempotent.
    async fn insert_alert_if_absent(
        &self,
        device_id: &str,
        kind: AlertKind,
        message: &str,
        severity: Severity,
    ) -> StoreResult<bool>;

    /// Mark the active alert of the given (device, kind) resolved, if one
    /// exists. Returns whether an alert was resolved.
    async fn resolve_alert(&self, device_id: &str, kind: AlertKind) -> StoreResult<bool>;

    /// Lightweight liveness check, called once at process boot.
    async fn health_check(&self) -> StoreResult<()>;
}

/// Time-series sink for metric points.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write one cycle's buffered points in a single batch.
    async fn write_batch(&self, points: Vec<MetricPoint>) -> StoreResult<()>;

    /// Lightweight liveness check, called once at process boot.
    async fn health_check(&self) -> StoreResult<()>;
}

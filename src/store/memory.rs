//! In-memory store implementations (no persistence)
//!
//! These back the default single-process deployment and the test suite.
//! All data is lost on restart; deployments that need durable inventory
//! or history plug their own engines in behind the traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::alerts::{AlertKind, Severity};
use crate::config::DeviceConfig;
use crate::{DeviceIdentity, DeviceStatus};

use super::backend::{InventoryStore, MetricPoint, TimeSeriesStore};
use super::error::StoreResult;

/// One alert row as kept by the inventory.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub device_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub active: bool,
    pub raised_at: DateTime<Utc>,
}

/// Last synced status of a device.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    pub identity: Option<DeviceIdentity>,
}

/// In-memory inventory store.
pub struct MemoryInventory {
    devices: RwLock<Vec<DeviceConfig>>,
    statuses: RwLock<HashMap<String, StatusRow>>,
    alerts: RwLock<Vec<AlertRow>>,
}

impl MemoryInventory {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self {
            devices: RwLock::new(devices),
            statuses: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Kinds of currently active alerts for a device (test/introspection).
    pub async fn active_alerts(&self, device_id: &str) -> Vec<AlertKind> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.active && a.device_id == device_id)
            .map(|a| a.kind)
            .collect()
    }

    /// All alert rows ever inserted, active or not.
    pub async fn alert_rows(&self) -> Vec<AlertRow> {
        self.alerts.read().await.clone()
    }

    /// Last synced status row for a device.
    pub async fn status(&self, device_id: &str) -> Option<StatusRow> {
        self.statuses.read().await.get(device_id).cloned()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn list_devices(&self) -> StoreResult<Vec<DeviceConfig>> {
        Ok(self.devices.read().await.clone())
    }

    async fn update_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        last_seen: DateTime<Utc>,
        identity: Option<&DeviceIdentity>,
    ) -> StoreResult<()> {
        let mut statuses = self.statuses.write().await;

        let row = statuses.entry(device_id.to_string()).or_insert(StatusRow {
            status,
            last_seen,
            identity: None,
        });
        row.status = status;
        row.last_seen = last_seen;
        // Identity is slow-changing - keep the previous value when this
        // cycle read none.
        if identity.is_some() {
            row.identity = identity.cloned();
        }

        Ok(())
    }

    async fn insert_alert_if_absent(
        &self,
        device_id: &str,
        kind: AlertKind,
        message: &str,
        severity: Severity,
    ) -> StoreResult<bool> {
        let mut alerts = self.alerts.write().await;

        let already_active = alerts
            .iter()
            .any(|a| a.active && a.device_id == device_id && a.kind == kind);
        if already_active {
            return Ok(false);
        }

        alerts.push(AlertRow {
            device_id: device_id.to_string(),
            kind,
            message: message.to_string(),
            severity,
            active: true,
            raised_at: Utc::now(),
        });

        Ok(true)
    }

    async fn resolve_alert(&self, device_id: &str, kind: AlertKind) -> StoreResult<bool> {
        let mut alerts = self.alerts.write().await;

        let mut resolved = false;
        for alert in alerts
            .iter_mut()
            .filter(|a| a.active && a.device_id == device_id && a.kind == kind)
        {
            alert.active = false;
            resolved = true;
        }

        Ok(resolved)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// In-memory time-series store.
pub struct MemoryTimeSeries {
    points: RwLock<Vec<MetricPoint>>,
    batches: RwLock<usize>,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            batches: RwLock::new(0),
        }
    }

    pub async fn points(&self) -> Vec<MetricPoint> {
        self.points.read().await.clone()
    }

    /// Number of batch writes performed.
    pub async fn batch_count(&self) -> usize {
        *self.batches.read().await
    }
}

impl Default for MemoryTimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeries {
    async fn write_batch(&self, points: Vec<MetricPoint>) -> StoreResult<()> {
        debug!("writing batch of {} points", points.len());

        *self.batches.write().await += 1;
        self.points.write().await.extend(points);

        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

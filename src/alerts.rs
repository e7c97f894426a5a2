//! Threshold alert evaluation
//!
//! A fixed rule table is evaluated after a device's metrics are assembled:
//!
//! | condition         | kind        | severity |
//! |-------------------|-------------|----------|
//! | unreachable       | OFFLINE     | CRITICAL |
//! | cpu load > 85     | CPU_HIGH    | CRITICAL |
//! | temperature > 65  | TEMP_HIGH   | WARNING  |
//! | voltage < 20      | VOLTAGE_LOW | WARNING  |
//!
//! Raising is idempotent: the inventory store guarantees at most one
//! active alert per (device, kind). Recovery resolves the active alert,
//! but only when the condition is *observed* clear - an absent metric
//! never resolves anything, so a device that stops reporting keeps its
//! active alerts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::store::InventoryStore;
use crate::{DeviceStatus, PollResult};

/// CPU load above this raises CPU_HIGH (percent)
pub const CPU_HIGH_LIMIT: f64 = 85.0;

/// Temperature above this raises TEMP_HIGH (Celsius)
pub const TEMP_HIGH_LIMIT: f64 = 65.0;

/// Voltage below this raises VOLTAGE_LOW (Volts)
pub const VOLTAGE_LOW_LIMIT: f64 = 20.0;

/// Alert deduplication key, unique per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Offline,
    CpuHigh,
    TempHigh,
    VoltageLow,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Offline => write!(f, "OFFLINE"),
            AlertKind::CpuHigh => write!(f, "CPU_HIGH"),
            AlertKind::TempHigh => write!(f, "TEMP_HIGH"),
            AlertKind::VoltageLow => write!(f, "VOLTAGE_LOW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Evaluates the rule table against one poll result.
pub struct AlertEvaluator {
    inventory: Arc<dyn InventoryStore>,
}

impl AlertEvaluator {
    pub fn new(inventory: Arc<dyn InventoryStore>) -> Self {
        Self { inventory }
    }

    /// Run all rules for one device. Store failures are logged and do not
    /// abort evaluation of the remaining rules.
    #[instrument(skip(self, result), fields(device = %result.device_id))]
    pub async fn evaluate(&self, result: &PollResult) {
        let device_id = &result.device_id;
        let metrics = &result.metrics;

        match result.status {
            DeviceStatus::Offline => {
                self.raise(
                    device_id,
                    AlertKind::Offline,
                    &format!("{} is unreachable", result.device_name),
                    Severity::Critical,
                )
                .await;
            }
            // The probe succeeded, so the OFFLINE condition is observed clear.
            DeviceStatus::Online | DeviceStatus::Warning => {
                self.resolve(device_id, AlertKind::Offline).await;
            }
        }

        if let Some(cpu) = metrics.cpu_load {
            if cpu > CPU_HIGH_LIMIT {
                self.raise(
                    device_id,
                    AlertKind::CpuHigh,
                    &format!("CPU load at {cpu:.0}% (limit {CPU_HIGH_LIMIT:.0}%)"),
                    Severity::Critical,
                )
                .await;
            } else {
                self.resolve(device_id, AlertKind::CpuHigh).await;
            }
        }

        if let Some(temp) = metrics.temperature {
            if temp > TEMP_HIGH_LIMIT {
                self.raise(
                    device_id,
                    AlertKind::TempHigh,
                    &format!("temperature at {temp:.0}C (limit {TEMP_HIGH_LIMIT:.0}C)"),
                    Severity::Warning,
                )
                .await;
            } else {
                self.resolve(device_id, AlertKind::TempHigh).await;
            }
        }

        if let Some(voltage) = metrics.voltage {
            if voltage < VOLTAGE_LOW_LIMIT {
                self.raise(
                    device_id,
                    AlertKind::VoltageLow,
                    &format!("voltage at {voltage:.1}V (limit {VOLTAGE_LOW_LIMIT:.0}V)"),
                    Severity::Warning,
                )
                .await;
            } else {
                self.resolve(device_id, AlertKind::VoltageLow).await;
            }
        }
    }

    async fn raise(&self, device_id: &str, kind: AlertKind, message: &str, severity: Severity) {
        match self
            .inventory
            .insert_alert_if_absent(device_id, kind, message, severity)
            .await
        {
            Ok(true) => debug!("{device_id}: raised {kind} ({severity})"),
            Ok(false) => {} // already active, no-op
            Err(e) => warn!("{device_id}: failed to raise {kind}: {e}"),
        }
    }

    async fn resolve(&self, device_id: &str, kind: AlertKind) {
        match self.inventory.resolve_alert(device_id, kind).await {
            Ok(true) => debug!("{device_id}: resolved {kind}"),
            Ok(false) => {}
            Err(e) => warn!("{device_id}: failed to resolve {kind}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceMetrics;
    use crate::store::MemoryInventory;
    use chrono::Utc;

    fn result_with(status: DeviceStatus, metrics: DeviceMetrics) -> PollResult {
        PollResult {
            device_id: "r1".to_string(),
            device_name: "Router 1".to_string(),
            status,
            latency: None,
            metrics,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_offline_raises_critical_alert() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());

        evaluator
            .evaluate(&result_with(DeviceStatus::Offline, DeviceMetrics::default()))
            .await;

        let active = inventory.active_alerts("r1").await;
        assert_eq!(active, vec![AlertKind::Offline]);
    }

    #[tokio::test]
    async fn test_raise_is_idempotent_while_active() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());
        let result = result_with(DeviceStatus::Offline, DeviceMetrics::default());

        evaluator.evaluate(&result).await;
        evaluator.evaluate(&result).await;

        assert_eq!(inventory.active_alerts("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_cpu_above_limit_raises() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());

        let metrics = DeviceMetrics {
            cpu_load: Some(90.0),
            ..Default::default()
        };
        evaluator
            .evaluate(&result_with(DeviceStatus::Online, metrics))
            .await;

        assert_eq!(inventory.active_alerts("r1").await, vec![AlertKind::CpuHigh]);
    }

    #[tokio::test]
    async fn test_recovery_resolves_only_observed_conditions() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());

        // Raise CPU_HIGH and TEMP_HIGH
        let metrics = DeviceMetrics {
            cpu_load: Some(95.0),
            temperature: Some(70.0),
            ..Default::default()
        };
        evaluator
            .evaluate(&result_with(DeviceStatus::Online, metrics))
            .await;
        assert_eq!(inventory.active_alerts("r1").await.len(), 2);

        // CPU recovers; temperature is no longer reported. Only CPU_HIGH
        // may resolve - the stale TEMP_HIGH must survive.
        let metrics = DeviceMetrics {
            cpu_load: Some(40.0),
            ..Default::default()
        };
        evaluator
            .evaluate(&result_with(DeviceStatus::Online, metrics))
            .await;

        assert_eq!(inventory.active_alerts("r1").await, vec![AlertKind::TempHigh]);
    }

    #[tokio::test]
    async fn test_voltage_below_limit_raises_warning() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());

        let metrics = DeviceMetrics {
            voltage: Some(18.5),
            ..Default::default()
        };
        evaluator
            .evaluate(&result_with(DeviceStatus::Online, metrics))
            .await;

        assert_eq!(
            inventory.active_alerts("r1").await,
            vec![AlertKind::VoltageLow]
        );
    }

    #[tokio::test]
    async fn test_successful_probe_resolves_offline() {
        let inventory = Arc::new(MemoryInventory::new(vec![]));
        let evaluator = AlertEvaluator::new(inventory.clone());

        evaluator
            .evaluate(&result_with(DeviceStatus::Offline, DeviceMetrics::default()))
            .await;
        assert_eq!(inventory.active_alerts("r1").await.len(), 1);

        evaluator
            .evaluate(&result_with(DeviceStatus::Online, DeviceMetrics::default()))
            .await;
        assert!(inventory.active_alerts("r1").await.is_empty());
    }
}

//! One poll cycle, end to end

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::alerts::AlertEvaluator;
use crate::config::{DeviceConfig, PollConfig};
use crate::fetcher::MetricsFetcher;
use crate::mgmt::ConnectionPool;
use crate::probe::Prober;
use crate::publish::{DetailEvent, DeviceSummary, Publisher, SummaryEvent};
use crate::store::{InventoryStore, MetricPoint, TimeSeriesStore};
use crate::{DeviceMetrics, DeviceStatus, PollResult};

use super::batch::for_each_chunk;

/// Drives probe, fetch, alert and sync for the whole fleet.
pub struct PollEngine {
    prober: Arc<dyn Prober>,
    pool: Arc<ConnectionPool>,
    fetcher: MetricsFetcher,
    alerts: AlertEvaluator,
    inventory: Arc<dyn InventoryStore>,
    tsdb: Arc<dyn TimeSeriesStore>,
    publisher: Arc<Publisher>,
    poll: PollConfig,
}

impl PollEngine {
    pub fn new(
        prober: Arc<dyn Prober>,
        pool: Arc<ConnectionPool>,
        inventory: Arc<dyn InventoryStore>,
        tsdb: Arc<dyn TimeSeriesStore>,
        publisher: Arc<Publisher>,
        poll: PollConfig,
    ) -> Self {
        Self {
            prober,
            pool,
            fetcher: MetricsFetcher::new(),
            alerts: AlertEvaluator::new(inventory.clone()),
            inventory,
            tsdb,
            publisher,
            poll,
        }
    }

    /// Run one full cycle: snapshot → chunked poll → flush → summary.
    ///
    /// Only a failure to load the device snapshot aborts the cycle; every
    /// later failure is per-device or logged-and-continued.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let devices = self
            .inventory
            .list_devices()
            .await
            .context("failed to load device snapshot")?;

        debug!(
            "cycle started: {} devices in chunks of {}",
            devices.len(),
            self.poll.chunk_size
        );

        let results =
            for_each_chunk(devices, self.poll.chunk_size, |d| self.process_device(d)).await;

        // One point per device per cycle, flushed as a single batch
        let points: Vec<MetricPoint> = results.iter().map(MetricPoint::from_result).collect();
        if let Err(e) = self.tsdb.write_batch(points).await {
            warn!("time-series flush failed (will retry next cycle): {e}");
        }

        self.publisher.publish_summary(SummaryEvent {
            timestamp: Utc::now(),
            devices: results.iter().map(DeviceSummary::from_result).collect(),
        });

        debug!("cycle finished: {} devices", results.len());
        Ok(())
    }

    /// Poll one device and run the follow-up pipeline. Never fails: every
    /// error ends up captured in the returned result.
    #[instrument(skip(self, device), fields(device = %device.id))]
    async fn process_device(&self, device: DeviceConfig) -> PollResult {
        let result = self.poll_device(&device).await;

        self.alerts.evaluate(&result).await;

        // Best-effort inventory sync, self-heals next cycle
        if let Err(e) = self
            .inventory
            .update_status(
                &result.device_id,
                result.status,
                result.timestamp,
                result.metrics.identity().as_ref(),
            )
            .await
        {
            warn!("inventory sync failed for {}: {e}", result.device_id);
        }

        self.publisher.publish_detail(DetailEvent::from_result(&result));

        result
    }

    async fn poll_device(&self, device: &DeviceConfig) -> PollResult {
        let latency = self.prober.probe(device.address).await;

        let Some(latency) = latency else {
            debug!("{}: unreachable", device.id);
            return self.result(device, DeviceStatus::Offline, None, DeviceMetrics::default());
        };

        // Ping-only devices are done here
        if device.managed.is_none() {
            return self.result(
                device,
                DeviceStatus::Online,
                Some(latency),
                DeviceMetrics::default(),
            );
        }

        let session = match self.pool.acquire(device).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{}: management session unavailable: {e}", device.id);
                return self.result(
                    device,
                    DeviceStatus::Warning,
                    Some(latency),
                    DeviceMetrics::default(),
                );
            }
        };

        match self.fetcher.fetch(session.as_ref(), device).await {
            Ok(metrics) => self.result(device, DeviceStatus::Online, Some(latency), metrics),
            Err(e) => {
                // Fatal session error: close and evict so the next cycle
                // reconnects from scratch.
                warn!("{}: fetch aborted: {e}", device.id);
                session.close().await;
                self.pool.evict(device.endpoint()).await;

                self.result(
                    device,
                    DeviceStatus::Warning,
                    Some(latency),
                    DeviceMetrics::default(),
                )
            }
        }
    }

    fn result(
        &self,
        device: &DeviceConfig,
        status: DeviceStatus,
        latency: Option<std::time::Duration>,
        metrics: DeviceMetrics,
    ) -> PollResult {
        PollResult {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            status,
            latency,
            metrics,
            timestamp: Utc::now(),
        }
    }
}

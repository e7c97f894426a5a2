//! End-to-end cycles over scripted devices and in-memory stores.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use fleetmon::DeviceStatus;
use fleetmon::alerts::AlertKind;
use fleetmon::config::PollConfig;
use fleetmon::mgmt::ConnectionPool;
use fleetmon::poller::{PollEngine, SchedulerHandle};
use fleetmon::publish::{Publisher, SubscriberSession};
use fleetmon::store::{
    MemoryInventory, MemoryTimeSeries, MetricPoint, StoreResult, TimeSeriesStore,
};

use helpers::{
    DeviceScript, Harness, MockProber, ScriptedConnector, managed_device, ping_device,
};

#[tokio::test]
async fn test_unreachable_device_goes_offline_with_alert() {
    let harness = Harness::new(vec![ping_device("gw", "10.0.0.1")]);
    // never marked reachable

    let mut dashboard = harness.publisher.subscribe_dashboard();
    harness.engine.run_cycle().await.unwrap();

    let row = harness.inventory.status("gw").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Offline);
    assert_eq!(
        harness.inventory.active_alerts("gw").await,
        vec![AlertKind::Offline]
    );

    // The summary still carries the device, with latency normalized to 0
    let summary = dashboard.try_recv().unwrap();
    assert_eq!(summary.devices.len(), 1);
    assert_eq!(summary.devices[0].status, DeviceStatus::Offline);
    assert_eq!(summary.devices[0].latency_ms, 0.0);

    // One point per device per cycle, even for unreachable ones
    let points = harness.tsdb.points().await;
    assert_eq!(points.len(), 1);
    assert!(points[0].cpu_load.is_none());
    assert!(points[0].rx_rate.is_none());
}

#[tokio::test]
async fn test_alerts_do_not_duplicate_across_cycles() {
    let device = managed_device("core", "10.0.0.2", 8728);
    let harness = Harness::new(vec![device.clone()]);

    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(2));
    harness
        .connector
        .script("core", DeviceScript::healthy().with_cpu(95.0));

    harness.engine.run_cycle().await.unwrap();
    harness.engine.run_cycle().await.unwrap();
    harness.engine.run_cycle().await.unwrap();

    assert_eq!(
        harness.inventory.active_alerts("core").await,
        vec![AlertKind::CpuHigh]
    );
    assert_eq!(harness.inventory.alert_rows().await.len(), 1);

    // The pooled session was reused across cycles
    assert_eq!(
        harness
            .connector
            .connects
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_recovered_device_resolves_offline_alert() {
    let device = ping_device("gw", "10.0.0.1");
    let harness = Harness::new(vec![device.clone()]);

    harness.engine.run_cycle().await.unwrap();
    assert_eq!(
        harness.inventory.active_alerts("gw").await,
        vec![AlertKind::Offline]
    );

    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(1));
    harness.engine.run_cycle().await.unwrap();

    assert!(harness.inventory.active_alerts("gw").await.is_empty());
    let row = harness.inventory.status("gw").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Online);
}

#[tokio::test]
async fn test_mixed_fleet_end_to_end() {
    let a = managed_device("a", "10.0.0.10", 8728);
    let b = managed_device("b", "10.0.0.11", 8728);
    let c = ping_device("c", "10.0.0.12");
    let harness = Harness::new(vec![a.clone(), b.clone(), c.clone()]);

    // a: reachable, cpu over the limit; b: unreachable; c: ping-only, fine
    harness
        .prober
        .set_reachable(a.address, Duration::from_millis(3));
    harness
        .prober
        .set_reachable(c.address, Duration::from_millis(1));
    harness
        .connector
        .script("a", DeviceScript::healthy().with_cpu(90.0));

    let mut dashboard = harness.publisher.subscribe_dashboard();
    let mut session = SubscriberSession::new(harness.publisher.clone());
    session.join_device("a");

    harness.engine.run_cycle().await.unwrap();

    // Statuses
    assert_eq!(
        harness.inventory.status("a").await.unwrap().status,
        DeviceStatus::Online
    );
    assert_eq!(
        harness.inventory.status("b").await.unwrap().status,
        DeviceStatus::Offline
    );
    assert_eq!(
        harness.inventory.status("c").await.unwrap().status,
        DeviceStatus::Online
    );

    // Alerts
    assert_eq!(
        harness.inventory.active_alerts("a").await,
        vec![AlertKind::CpuHigh]
    );
    assert_eq!(
        harness.inventory.active_alerts("b").await,
        vec![AlertKind::Offline]
    );
    assert!(harness.inventory.active_alerts("c").await.is_empty());

    // b never got a management session
    assert!(!harness.pool.contains(&b.endpoint()));

    // Dashboard summary covers the whole fleet
    let summary = dashboard.try_recv().unwrap();
    assert_eq!(summary.devices.len(), 3);

    // The subscriber joined only device a and gets exactly its one event
    let rx = session.device_receiver("a").unwrap();
    let detail = rx.try_recv().unwrap();
    assert_eq!(detail.device_id, "a");
    assert_eq!(detail.metrics.cpu_load, Some(90.0));
    assert!(rx.try_recv().is_err());

    // Identity fields landed in the inventory, not the time series
    let row = harness.inventory.status("a").await.unwrap();
    assert_eq!(
        row.identity.unwrap().board_name.as_deref(),
        Some("RB4011")
    );
    let points = harness.tsdb.points().await;
    assert_eq!(points.len(), 3);
}

#[tokio::test]
async fn test_session_failure_marks_warning_and_evicts() {
    let device = managed_device("core", "10.0.0.2", 8728);
    let harness = Harness::new(vec![device.clone()]);

    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(2));
    harness
        .connector
        .script("core", DeviceScript::healthy().fatal());

    harness.engine.run_cycle().await.unwrap();

    let row = harness.inventory.status("core").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Warning);

    // The dead session was evicted; the next cycle reconnects
    assert!(!harness.pool.contains(&device.endpoint()));

    harness.connector.script("core", DeviceScript::healthy());
    harness.engine.run_cycle().await.unwrap();

    let row = harness.inventory.status("core").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Online);
    assert_eq!(
        harness
            .connector
            .connects
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn test_refused_connect_marks_warning_not_offline() {
    let device = managed_device("core", "10.0.0.2", 8728);
    let harness = Harness::new(vec![device.clone()]);

    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(2));
    harness
        .connector
        .script("core", DeviceScript::healthy().unreachable_mgmt());

    harness.engine.run_cycle().await.unwrap();

    let row = harness.inventory.status("core").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Warning);

    // The probe answered, so no OFFLINE alert
    assert!(harness.inventory.active_alerts("core").await.is_empty());
}

#[tokio::test]
async fn test_missing_health_block_is_not_an_error() {
    let device = managed_device("core", "10.0.0.2", 8728);
    let harness = Harness::new(vec![device.clone()]);

    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(2));
    harness
        .connector
        .script("core", DeviceScript::healthy().without_health());

    harness.engine.run_cycle().await.unwrap();

    let row = harness.inventory.status("core").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Online);

    let points = harness.tsdb.points().await;
    assert_eq!(points[0].cpu_load, Some(10.0));
    assert!(points[0].temperature.is_none());
    assert!(harness.inventory.active_alerts("core").await.is_empty());
}

/// Time-series sink that holds every batch write for a fixed delay.
struct SlowTimeSeries {
    inner: MemoryTimeSeries,
    delay: Duration,
}

#[async_trait]
impl TimeSeriesStore for SlowTimeSeries {
    async fn write_batch(&self, points: Vec<MetricPoint>) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.write_batch(points).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_scheduler_skips_ticks_while_cycle_runs() {
    let device = ping_device("gw", "10.0.0.1");

    let prober = Arc::new(MockProber::new());
    prober.set_reachable(device.address, Duration::from_millis(1));

    let connector = Arc::new(ScriptedConnector::new());
    let pool = Arc::new(ConnectionPool::new(connector, Duration::from_secs(1)));
    let inventory = Arc::new(MemoryInventory::new(vec![device]));
    let tsdb = Arc::new(SlowTimeSeries {
        inner: MemoryTimeSeries::new(),
        delay: Duration::from_millis(120),
    });
    let publisher = Arc::new(Publisher::new());

    let engine = Arc::new(PollEngine::new(
        prober,
        pool,
        inventory,
        tsdb,
        publisher,
        PollConfig::default(),
    ));

    // Ticks fire much faster than a cycle completes
    let scheduler = SchedulerHandle::spawn(engine, Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = scheduler.stats().await.unwrap();
    assert!(stats.cycles_started >= 1);
    assert!(stats.ticks_skipped >= 1, "overlapping ticks must be skipped");

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_poll_now_runs_a_cycle() {
    let device = ping_device("gw", "10.0.0.1");
    let harness = Harness::new(vec![device.clone()]);
    harness
        .prober
        .set_reachable(device.address, Duration::from_millis(1));

    // Interval far in the future: only explicit polls run
    let scheduler = SchedulerHandle::spawn(harness.engine.clone(), Duration::from_secs(3600));

    scheduler.poll_now().await.unwrap();

    let row = harness.inventory.status("gw").await.unwrap();
    assert_eq!(row.status, DeviceStatus::Online);
    assert_eq!(harness.tsdb.batch_count().await, 1);

    let stats = scheduler.stats().await.unwrap();
    assert_eq!(stats.cycles_started, 1);
    assert_eq!(stats.ticks_skipped, 0);

    scheduler.shutdown().await.unwrap();
}

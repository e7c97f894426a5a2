use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleetmon::{
    config::read_config_file,
    mgmt::{ConnectionPool, MgmtConnector},
    poller::{PollEngine, SchedulerHandle},
    probe::IcmpProber,
    publish::Publisher,
    store::{InventoryStore, MemoryInventory, MemoryTimeSeries, TimeSeriesStore},
};
use tracing::{debug, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetmon", LevelFilter::TRACE),
        ("fleetmond", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let inventory: Arc<MemoryInventory> = Arc::new(MemoryInventory::new(config.devices.clone()));
    let tsdb = Arc::new(MemoryTimeSeries::new());

    // The only fatal condition: stores unreachable at boot
    inventory
        .health_check()
        .await
        .context("inventory store unavailable")?;
    tsdb.health_check()
        .await
        .context("time-series store unavailable")?;

    let publisher = Arc::new(Publisher::new());
    let prober = Arc::new(IcmpProber::new(config.poll.probe_timeout()));
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(MgmtConnector::new()),
        config.poll.connect_timeout(),
    ));

    let engine = Arc::new(PollEngine::new(
        prober,
        pool,
        inventory,
        tsdb,
        publisher,
        config.poll.clone(),
    ));

    let scheduler = SchedulerHandle::spawn(engine, config.poll.interval());
    debug!(
        "polling {} devices every {}s",
        config.devices.len(),
        config.poll.interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    debug!("shutting down");
    scheduler.shutdown().await?;

    Ok(())
}

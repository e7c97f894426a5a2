//! CycleScheduler - fires one poll cycle per fixed interval
//!
//! The scheduler is an actor: it owns the interval timer and a command
//! channel, and spawns each cycle as its own task so the loop stays
//! responsive. A single in-flight flag guarantees cycles never overlap -
//! a tick that lands while a cycle is still running is skipped and
//! logged. The flag is released by an RAII guard, so a cycle that errors
//! (or panics) partway cannot leave the flag stuck.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, instrument, warn};

use super::engine::PollEngine;

/// Commands that can be sent to the scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a cycle immediately (bypassing the interval timer) and report
    /// its outcome. Fails if a cycle is already in flight.
    PollNow {
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// Get scheduling counters
    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },

    /// Gracefully shut down the scheduler
    Shutdown,
}

/// Scheduling counters, mainly for tests and operator introspection.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Cycles actually started
    pub cycles_started: usize,

    /// Ticks skipped because a cycle was still in flight
    pub ticks_skipped: usize,
}

/// Releases the in-flight flag on every exit path, including panics.
struct CycleGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

pub struct CycleScheduler {
    engine: Arc<PollEngine>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    tick_interval: Duration,

    in_flight: Arc<AtomicBool>,
    cycles_started: Arc<AtomicUsize>,
    ticks_skipped: Arc<AtomicUsize>,
}

impl CycleScheduler {
    fn new(
        engine: Arc<PollEngine>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            command_rx,
            tick_interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            cycles_started: Arc::new(AtomicUsize::new(0)),
            ticks_skipped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Try to claim the in-flight flag; `None` means a cycle is running.
    fn try_begin(&self) -> Option<CycleGuard> {
        let claimed = self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        claimed.then(|| {
            self.cycles_started.fetch_add(1, Ordering::SeqCst);
            CycleGuard {
                in_flight: self.in_flight.clone(),
            }
        })
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting cycle scheduler (interval {:?})", self.tick_interval);

        let mut ticker = interval(self.tick_interval);
        // Skipped/late ticks must not burst-fire later
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately; consume it
        // so startup does not double-poll with an explicit PollNow.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.try_begin() {
                        Some(guard) => {
                            let engine = self.engine.clone();
                            tokio::spawn(async move {
                                let _guard = guard;
                                if let Err(e) = engine.run_cycle().await {
                                    error!("poll cycle failed: {:#}", e);
                                }
                            });
                        }
                        None => {
                            warn!("previous cycle still running, skipping tick");
                            self.ticks_skipped.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::PollNow { respond_to } => {
                            let result = match self.try_begin() {
                                Some(guard) => {
                                    let result = self.engine.run_cycle().await;
                                    drop(guard);
                                    result
                                }
                                None => Err(anyhow::anyhow!("a cycle is already in flight")),
                            };
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(SchedulerStats {
                                cycles_started: self.cycles_started.load(Ordering::SeqCst),
                                ticks_skipped: self.ticks_skipped.load(Ordering::SeqCst),
                            });
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("cycle scheduler stopped");
    }
}

/// Handle for controlling the scheduler. Cloneable and shareable.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler as a tokio task and return its handle.
    pub fn spawn(engine: Arc<PollEngine>, tick_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let scheduler = CycleScheduler::new(engine, cmd_rx, tick_interval);
        tokio::spawn(scheduler.run());

        Self { sender: cmd_tx }
    }

    /// Run a cycle immediately and wait for it to complete.
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Get scheduling counters.
    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

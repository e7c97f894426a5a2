//! Polling engine
//!
//! One scheduler drives the whole fleet:
//!
//! ```text
//!  interval tick ──► CycleScheduler ──skip if a cycle is in flight
//!                         │
//!                         ▼
//!                    PollEngine::run_cycle
//!                         │  load device snapshot
//!                         ▼
//!                  chunked batching (chunks sequential,
//!                  devices within a chunk concurrent)
//!                         │  per device:
//!                         ▼
//!          probe ─► pool ─► fetch ─► alerts ─► sync ─► detail publish
//!                         │
//!                         ▼
//!          time-series flush + dashboard summary (after all chunks)
//! ```
//!
//! Per-device failures are captured values - a broken device never aborts
//! its chunk siblings, and no failure crashes the process.

pub mod batch;
pub mod engine;
pub mod scheduler;

pub use engine::PollEngine;
pub use scheduler::{SchedulerHandle, SchedulerStats};

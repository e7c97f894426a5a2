//! External store interfaces
//!
//! The inventory store and time-series store are external collaborators:
//! the polling engine only reads a device snapshot from the former and
//! writes status/alert/point updates back. Both are behind traits so
//! deployments can plug in their actual engines; the in-memory
//! implementations back tests and the default single-process wiring.

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{InventoryStore, MetricPoint, TimeSeriesStore};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryInventory, MemoryTimeSeries};

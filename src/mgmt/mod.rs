//! Managed-device protocol client
//!
//! Devices are managed over a session-oriented TCP protocol (optionally
//! wrapped in TLS). A session is opened with credentials and then answers
//! independent read commands for resource info, health sensors, interface
//! byte counters and the active-session count.
//!
//! ```text
//!   acquire(key)                    read queries
//!  ┌───────────────┐   Ready    ┌──────────────────┐
//!  │ ConnectionPool├───────────►│   MgmtSession    │
//!  └───────┬───────┘            └────────┬─────────┘
//!          │ evict on close/error        │ watch channel
//!          ◄─────────────────────────────┘
//! ```
//!
//! The pool owns at most one live session per (address, port) key. Any
//! close or error signalled by the session evicts the key, so the next
//! acquire reconnects from scratch.

pub mod pool;
pub mod proto;
pub mod session;

pub use pool::ConnectionPool;
pub use session::{
    Connector, HealthInfo, InterfaceCounters, ManagedSession, MgmtConnector, ResourceInfo,
    SessionError,
};

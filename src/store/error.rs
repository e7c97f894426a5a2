//! Error types for store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the external stores
#[derive(Debug)]
pub enum StoreError {
    /// Store connection failed
    ConnectionFailed(String),

    /// Query or write failed
    QueryFailed(String),

    /// Referenced device does not exist in the inventory
    UnknownDevice(String),

    /// The store is not healthy
    Unhealthy(String),

    /// I/O error
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to store: {}", msg)
            }
            StoreError::QueryFailed(msg) => write!(f, "store query failed: {}", msg),
            StoreError::UnknownDevice(id) => write!(f, "unknown device: {}", id),
            StoreError::Unhealthy(msg) => write!(f, "store unhealthy: {}", msg),
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

//! Error types for driver connections.
//!
//! Query failures are not errors in this crate: they travel inside
//! `QueryResult::error`. `DriverError` is reserved for "we cannot talk to the
//! backend at all" (bad config, missing file, rejected credentials, no route).

use std::path::PathBuf;

use thiserror::Error;

/// Fault raised by driver connection lifecycle operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The embedded database file does not exist.
    #[error("Database file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The backend rejected the supplied credentials.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// The backend could not be reached (DNS, refused, timeout, TLS).
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// The connection parameters are incomplete or malformed.
    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),

    /// An operation needing a live connection was called before `connect`.
    #[error("Not connected to {0}")]
    NotConnected(&'static str),

    /// Any other backend fault outside a query.
    #[error("{0}")]
    Backend(String),
}

impl DriverError {
    /// Whether this error describes a failure to establish a connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DriverError::FileNotFound(_)
                | DriverError::AuthRejected(_)
                | DriverError::Unreachable(_)
                | DriverError::InvalidConfig(_)
        )
    }
}

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

//! Error types for xapool
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{PoolId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type alias for xapool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for xapool
#[derive(Debug, Error)]
pub enum Error {
    /// No idle connection and `max_active` already reached
    #[error("Connection pool exhausted: all {max_active} connections are active")]
    PoolExhausted {
        /// Configured upper bound on connections
        max_active: usize,
    },

    /// The pool has been shut down
    #[error("Connection pool {0} is closed")]
    PoolClosed(PoolId),

    /// A transaction already holds a connection for this pool
    ///
    /// Indicates a broken acquisition protocol, never a user error.
    #[error("Transaction {txn} already enlisted a connection from pool {pool}")]
    AlreadyEnlisted {
        /// Enlisting transaction
        txn: TransactionId,
        /// Pool the connection came from
        pool: PoolId,
    },

    /// Operation on a connection handle that is closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The physical connection factory failed
    #[error("Failed to open physical connection: {0}")]
    Connect(String),

    /// Closing a physical connection failed
    #[error("Failed to close physical connection: {0}")]
    PhysicalClose(String),

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation requires an active transaction on the calling thread
    #[error("No transaction is associated with the current thread")]
    NoTransaction,

    /// The calling thread already has a transaction (nesting is not supported)
    #[error("Transaction {0} is already associated with the current thread")]
    TransactionActive(TransactionId),

    /// The transaction has already completed or was never started
    #[error("Transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    /// The transaction exceeded its timeout and was rolled back
    #[error("Transaction {0} timed out and was rolled back")]
    TransactionTimedOut(TransactionId),

    /// Commit was requested for a rollback-only transaction
    #[error("Transaction {0} was marked rollback-only and has been rolled back")]
    RolledBack(TransactionId),

    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Error::Connect(msg.into())
    }

    /// Create a physical close error
    pub fn physical_close(msg: impl Into<String>) -> Self {
        Error::PhysicalClose(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create a configuration file error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether the error came from running out of pooled connections
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. })
    }
}

//! Collaborator traits
//!
//! The pooling core talks to the outside world through three seams:
//! - PhysicalConnection / PhysicalConnectionFactory: the driver
//! - AmbientTransaction: the transaction manager
//!
//! Keeping them as traits lets tests plug in the in-memory driver and the
//! local transaction manager, and lets real deployments plug in theirs.

use crate::error::Result;
use crate::types::{TransactionId, TransactionOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Driver-reported metadata about a physical connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Connection URL the driver connected to
    pub url: String,
    /// Authenticated user
    pub user: String,
    /// Database product name reported by the driver
    pub product_name: String,
}

/// A raw driver connection
///
/// Owned by exactly one party at a time: the pool while idle, a connection
/// handle while checked out.
pub trait PhysicalConnection: Send + fmt::Debug {
    /// Driver metadata. Calling this is how callers force the connection
    /// into use.
    fn metadata(&self) -> ConnectionMetadata;

    /// Liveness check used by borrow/return validation.
    fn is_valid(&self) -> bool {
        true
    }

    /// Close the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to close cleanly. The connection
    /// is considered gone either way.
    fn close(&mut self) -> Result<()>;
}

/// Produces new physical connections on demand
pub trait PhysicalConnectionFactory: Send + Sync {
    /// Open a new physical connection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connect`] when the driver cannot connect.
    fn create(&self) -> Result<Box<dyn PhysicalConnection>>;
}

/// Callback run once when a transaction completes
///
/// Failures are reported to the transaction manager, which logs them; they
/// never affect the outcome of the transaction or of other callbacks.
pub type CompletionCallback = Box<dyn FnOnce(TransactionOutcome) -> Result<()> + Send + 'static>;

/// The ambient transaction collaborator
///
/// "Ambient" means associated with the calling thread: `current()` answers
/// for whoever calls it.
pub trait AmbientTransaction: Send + Sync {
    /// Transaction associated with the calling thread, if any.
    fn current(&self) -> Option<TransactionId>;

    /// Register a callback to run after `txn` completes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TransactionNotActive`] if `txn` is not active.
    fn register_completion(&self, txn: TransactionId, callback: CompletionCallback) -> Result<()>;
}

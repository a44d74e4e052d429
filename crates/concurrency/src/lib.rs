//! Transaction-side plumbing for xapool
//!
//! This crate implements:
//! - TransactionRegistry: `(TransactionId, PoolId)` → enlisted handle
//! - LocalTransactionManager: thread-associated transactions with
//!   completion callbacks, implementing `AmbientTransaction`
//!
//! The manager has no recovery log and no two-phase commit; it exists so the
//! pooling layer can be driven end to end without an external transaction
//! service.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod registry;

pub use manager::{
    CompletionReport, LocalTransactionManager, TransactionMetrics, TransactionStatus,
};
pub use registry::TransactionRegistry;

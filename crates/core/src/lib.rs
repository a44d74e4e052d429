//! Core types and traits for xapool
//!
//! This crate defines the foundational types shared by every layer:
//! - PoolId / TransactionId / ConnectionId: identities
//! - Error: error type hierarchy
//! - Traits: collaborator contracts (PhysicalConnection, PhysicalConnectionFactory,
//!   AmbientTransaction)
//! - Config: datasource configuration loaded from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{DataSourceConfig, DataSourcesFile};
pub use error::{Error, Result};
pub use traits::{
    AmbientTransaction, CompletionCallback, ConnectionMetadata, PhysicalConnection,
    PhysicalConnectionFactory,
};
pub use types::{ConnectionId, PoolId, TransactionId, TransactionOutcome};

//! Transaction-aware datasource for xapool
//!
//! This crate ties the lower layers together:
//! - Datasource: builds a pool from configuration and hands out connections
//! - Enlistment: keeps one physical connection per (transaction, pool)
//! - Connection handles: per-caller views with idempotent close
//! - Named registry: resource-name lookup of live datasources
//!
//! The pool knows nothing about transactions and the transaction manager
//! knows nothing about pools; only this crate sees both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod datasource;
mod enlistment;

pub use connection::{ConnectionHandle, HandleState, ManagedConnection};
pub use datasource::{
    lookup_datasource, register_datasource, unregister_datasource, DataSourceBuilder,
    DataSourceStats, ManagedDataSource,
};
pub use enlistment::{ConnectionRegistry, EnlistmentStats};

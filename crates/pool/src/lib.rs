//! Bounded pool of physical connections
//!
//! This crate provides:
//! - ConnectionPool: idle/active accounting with `max_idle` / `max_active`
//! - PooledConnection: a checked-out physical connection with its identity
//! - MemoryConnectionFactory: an in-process driver for tests and demos
//!
//! # Architecture
//!
//! All bookkeeping sits behind one mutex per pool. Driver calls (connect,
//! validate, close) always run outside that lock; a connection being opened
//! reserves its slot first so `idle + active <= max_active` holds while the
//! driver works.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod pool;

pub use memory::{MemoryConnection, MemoryConnectionFactory, MEMORY_PRODUCT_NAME};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};

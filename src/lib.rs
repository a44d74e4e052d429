//! xapool - transaction-scoped pooled connections
//!
//! A datasource hands out connections from a bounded pool. While the calling
//! thread is inside a transaction, every request against the same
//! datasource yields the same physical connection, and that connection goes
//! back to the pool only when the transaction completes, however early the
//! application closes it.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use xapool::{DataSourceConfig, LocalTransactionManager, ManagedDataSource, MemoryConnectionFactory};
//!
//! let txm = Arc::new(LocalTransactionManager::new());
//! let ds = ManagedDataSource::builder(DataSourceConfig::new("xadb").with_max_active(25))
//!     .factory(Arc::new(MemoryConnectionFactory::new("mem:xadb", "sa")))
//!     .transactions(txm.clone())
//!     .build()?;
//!
//! txm.in_transaction(|_| {
//!     let conn = ds.get_connection()?;
//!     conn.close()?; // still reserved for the transaction
//!     Ok(())
//! })?;
//! assert_eq!(ds.active(), 0);
//! ```
//!
//! # Architecture
//!
//! - `xapool-core`: ids, errors, configuration, collaborator traits
//! - `xapool-pool`: the bounded pool and an in-memory driver
//! - `xapool-concurrency`: the enlistment registry and a local transaction manager
//! - `xapool-engine`: datasources and connection handles

pub use xapool_concurrency::{
    CompletionReport, LocalTransactionManager, TransactionMetrics, TransactionRegistry,
    TransactionStatus,
};
pub use xapool_core::{
    AmbientTransaction, CompletionCallback, ConnectionId, ConnectionMetadata, DataSourceConfig,
    DataSourcesFile, Error, PhysicalConnection, PhysicalConnectionFactory, PoolId, Result,
    TransactionId, TransactionOutcome,
};
pub use xapool_engine::{
    lookup_datasource, register_datasource, unregister_datasource, ConnectionRegistry,
    DataSourceBuilder, DataSourceStats, EnlistmentStats, HandleState, ManagedConnection,
    ManagedDataSource,
};
pub use xapool_pool::{
    ConnectionPool, MemoryConnection, MemoryConnectionFactory, PoolConfig, PoolStats,
    PooledConnection, MEMORY_PRODUCT_NAME,
};

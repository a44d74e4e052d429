//! Transaction-aware datasource
//!
//! A [`ManagedDataSource`] owns one connection pool. When it is JTA-managed
//! and the calling thread has an active transaction, every
//! `get_connection()` in that transaction yields the same physical
//! connection, which goes back to the pool when the transaction completes.
//! Otherwise each call checks a connection out and `close()` returns it.
//!
//! ## Example
//!
//! ```ignore
//! use xapool_engine::ManagedDataSource;
//!
//! let ds = ManagedDataSource::builder(config)
//!     .factory(Arc::new(factory))
//!     .transactions(txm.clone())
//!     .build()?;
//!
//! txm.in_transaction(|_| {
//!     let a = ds.get_connection()?;
//!     let b = ds.get_connection()?;
//!     assert_eq!(a.physical_id()?, b.physical_id()?);
//!     Ok(())
//! })?;
//! ```

mod builder;
mod registry;

pub use builder::DataSourceBuilder;
pub use registry::{lookup_datasource, register_datasource, unregister_datasource};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use xapool_core::{DataSourceConfig, PoolId, Result};
use xapool_pool::{ConnectionPool, PoolStats};

use crate::connection::{ConnectionHandle, ManagedConnection};
use crate::enlistment::{EnlistmentCoordinator, EnlistmentStats};

/// Diagnostics snapshot of a datasource
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceStats {
    /// Datasource name
    pub name: String,
    /// Pool counters
    pub pool: PoolStats,
    /// Enlistment counters; `None` when not JTA-managed
    pub enlistment: Option<EnlistmentStats>,
}

/// Pooled datasource bound to an ambient transaction
pub struct ManagedDataSource {
    config: DataSourceConfig,
    pool: Arc<ConnectionPool>,
    enlistment: Option<EnlistmentCoordinator>,
}

impl ManagedDataSource {
    /// Start building a datasource from `config`
    pub fn builder(config: DataSourceConfig) -> DataSourceBuilder {
        DataSourceBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: DataSourceConfig,
        pool: Arc<ConnectionPool>,
        enlistment: Option<EnlistmentCoordinator>,
    ) -> Self {
        info!(
            target: "xapool::datasource",
            name = %config.name,
            pool = %pool.id(),
            jta_managed = enlistment.is_some(),
            "Datasource ready"
        );
        Self {
            config,
            pool,
            enlistment,
        }
    }

    /// Get a connection.
    ///
    /// Inside a transaction (JTA-managed datasources only) this returns a
    /// view on the connection the transaction already holds from this
    /// datasource, checking one out on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if a new connection is needed and none is available
    /// - [`Error::PoolClosed`] after [`close`](Self::close)
    /// - [`Error::TransactionNotActive`] if the transaction completed underneath the call
    ///
    /// [`Error::PoolExhausted`]: xapool_core::Error::PoolExhausted
    /// [`Error::PoolClosed`]: xapool_core::Error::PoolClosed
    /// [`Error::TransactionNotActive`]: xapool_core::Error::TransactionNotActive
    pub fn get_connection(&self) -> Result<ManagedConnection> {
        if let Some(enlistment) = &self.enlistment {
            if let Some(txn) = enlistment.current() {
                return enlistment.connection_for(txn);
            }
        }
        let conn = self.pool.acquire()?;
        Ok(ManagedConnection::new(ConnectionHandle::new(
            Arc::clone(&self.pool),
            None,
            conn,
        )))
    }

    /// Connections checked out
    pub fn active(&self) -> usize {
        self.pool.active_count()
    }

    /// Connections idle in the pool
    pub fn idle(&self) -> usize {
        self.pool.idle_count()
    }

    /// Diagnostics snapshot
    pub fn stats(&self) -> DataSourceStats {
        DataSourceStats {
            name: self.config.name.clone(),
            pool: self.pool.stats(),
            enlistment: self.enlistment.as_ref().map(|e| e.stats()),
        }
    }

    /// Datasource name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the datasource was built from
    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    /// Identity of the underlying pool
    pub fn pool_id(&self) -> PoolId {
        self.pool.id()
    }

    /// Whether connections follow the ambient transaction
    pub fn is_jta_managed(&self) -> bool {
        self.enlistment.is_some()
    }

    /// Shut the pool down.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// as they come back. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.pool.close()
    }
}

impl fmt::Debug for ManagedDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDataSource")
            .field("name", &self.config.name)
            .field("pool", &self.pool)
            .field("enlistment", &self.enlistment)
            .finish()
    }
}

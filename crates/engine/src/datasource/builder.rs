//! Datasource builder
//!
//! Explicit wiring in place of container injection: the caller supplies the
//! configuration, a driver factory and (for JTA-managed datasources) the
//! transaction collaborator.

use std::fmt;
use std::sync::Arc;
use xapool_core::{AmbientTransaction, DataSourceConfig, Error, PhysicalConnectionFactory, Result};
use xapool_pool::{ConnectionPool, PoolConfig};

use super::ManagedDataSource;
use crate::enlistment::{ConnectionRegistry, EnlistmentCoordinator};

/// Builder for [`ManagedDataSource`]
///
/// ```ignore
/// let ds = ManagedDataSource::builder(DataSourceConfig::from_toml_str(text)?)
///     .factory(Arc::new(MemoryConnectionFactory::new("mem:xadb", "sa")))
///     .transactions(txm)
///     .build()?;
/// ```
pub struct DataSourceBuilder {
    config: DataSourceConfig,
    factory: Option<Arc<dyn PhysicalConnectionFactory>>,
    transactions: Option<Arc<dyn AmbientTransaction>>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl DataSourceBuilder {
    /// Create a builder for `config`
    pub fn new(config: DataSourceConfig) -> Self {
        Self {
            config,
            factory: None,
            transactions: None,
            registry: None,
        }
    }

    /// Driver used to open physical connections (required)
    pub fn factory(mut self, factory: Arc<dyn PhysicalConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Transaction collaborator (required when `jta_managed` is set)
    pub fn transactions(mut self, transactions: Arc<dyn AmbientTransaction>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    /// Share an enlistment registry with other datasources.
    ///
    /// Each datasource gets its own registry by default. Keys include the
    /// pool id, so sharing never mixes connections between datasources.
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate the configuration, open the pool and prewarm it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for bad sizing, a missing factory, or a
    ///   JTA-managed datasource without a transaction collaborator
    /// - the factory's error if a prewarm connection cannot be opened
    pub fn build(self) -> Result<ManagedDataSource> {
        self.config.validate()?;
        let factory = self.factory.ok_or_else(|| {
            Error::invalid_config(format!(
                "datasource '{}' has no connection factory",
                self.config.name
            ))
        })?;

        let enlistment_parts = if self.config.jta_managed {
            let transactions = self.transactions.ok_or_else(|| {
                Error::invalid_config(format!(
                    "datasource '{}' is JTA-managed but has no transaction manager",
                    self.config.name
                ))
            })?;
            Some((transactions, self.registry.unwrap_or_default()))
        } else {
            None
        };

        let pool = Arc::new(ConnectionPool::new(PoolConfig::from(&self.config), factory)?);
        let enlistment = enlistment_parts.map(|(transactions, registry)| {
            EnlistmentCoordinator::new(Arc::clone(&pool), registry, transactions)
        });
        Ok(ManagedDataSource::from_parts(self.config, pool, enlistment))
    }
}

impl fmt::Debug for DataSourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceBuilder")
            .field("config", &self.config)
            .field("factory", &self.factory.is_some())
            .field("transactions", &self.transactions.is_some())
            .finish()
    }
}

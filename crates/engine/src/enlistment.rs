//! Transaction enlistment for one datasource
//!
//! The first `get_connection()` in a transaction checks a connection out,
//! records it in the registry under `(txn, pool)` and registers a completion
//! callback. Later calls in the same transaction find the registry entry and
//! get another view on the same connection. When the transaction completes,
//! the callback delists the entry and gives the connection back.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use xapool_concurrency::TransactionRegistry;
use xapool_core::{AmbientTransaction, Error, Result, TransactionId, TransactionOutcome};
use xapool_pool::ConnectionPool;

use crate::connection::{ConnectionHandle, ManagedConnection};

/// Registry type shared by every datasource that enlists connections
pub type ConnectionRegistry = TransactionRegistry<Arc<ConnectionHandle>>;

/// Enlistment counters
///
/// # Memory Ordering
///
/// Relaxed throughout; the counters are observational only.
#[derive(Debug, Default)]
struct EnlistmentCounters {
    enlisted: AtomicU64,
    reused: AtomicU64,
    completed: AtomicU64,
    completion_failures: AtomicU64,
}

/// Snapshot of enlistment activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnlistmentStats {
    /// Connections checked out on behalf of a transaction
    pub enlisted: u64,
    /// Requests answered from the registry
    pub reused: u64,
    /// Completion callbacks that gave a connection back
    pub completed: u64,
    /// Completion callbacks whose return failed
    pub completion_failures: u64,
}

/// Binds one pool to the ambient transaction
pub(crate) struct EnlistmentCoordinator {
    pool: Arc<ConnectionPool>,
    registry: Arc<ConnectionRegistry>,
    transactions: Arc<dyn AmbientTransaction>,
    counters: Arc<EnlistmentCounters>,
}

impl EnlistmentCoordinator {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        registry: Arc<ConnectionRegistry>,
        transactions: Arc<dyn AmbientTransaction>,
    ) -> Self {
        Self {
            pool,
            registry,
            transactions,
            counters: Arc::new(EnlistmentCounters::default()),
        }
    }

    /// Calling thread's transaction, if any
    pub(crate) fn current(&self) -> Option<TransactionId> {
        self.transactions.current()
    }

    /// Connection for `txn`, reusing the one it already holds from this pool.
    pub(crate) fn connection_for(&self, txn: TransactionId) -> Result<ManagedConnection> {
        let pool_id = self.pool.id();

        if let Some(handle) = self.registry.lookup(txn, pool_id) {
            if handle.is_returned() {
                // Completion is running; the entry is about to be delisted
                return Err(Error::TransactionNotActive(txn));
            }
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            debug!(target: "xapool::datasource", %txn, pool = %pool_id, "Reusing enlisted connection");
            return Ok(ManagedConnection::new(handle));
        }

        let conn = self.pool.acquire()?;
        let handle = ConnectionHandle::new(Arc::clone(&self.pool), Some(txn), conn);

        if let Err(e) = self.registry.enlist(txn, pool_id, Arc::clone(&handle)) {
            release_quietly(&handle, txn);
            return Err(e);
        }

        let callback = {
            let registry = Arc::clone(&self.registry);
            let counters = Arc::clone(&self.counters);
            let handle = Arc::clone(&handle);
            Box::new(move |outcome: TransactionOutcome| {
                registry.delist(txn, pool_id);
                debug!(target: "xapool::datasource", %txn, %outcome, pool = %pool_id, "Transaction completed, delisted");
                match handle.return_to_pool() {
                    Ok(_) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(e) => {
                        counters.completion_failures.fetch_add(1, Ordering::Relaxed);
                        Err(e)
                    }
                }
            })
        };

        if let Err(e) = self.transactions.register_completion(txn, callback) {
            self.registry.delist(txn, pool_id);
            release_quietly(&handle, txn);
            return Err(e);
        }

        self.counters.enlisted.fetch_add(1, Ordering::Relaxed);
        debug!(target: "xapool::datasource", %txn, pool = %pool_id, "Connection enlisted");
        Ok(ManagedConnection::new(handle))
    }

    pub(crate) fn stats(&self) -> EnlistmentStats {
        EnlistmentStats {
            enlisted: self.counters.enlisted.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            completion_failures: self.counters.completion_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EnlistmentCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnlistmentCoordinator")
            .field("pool_id", &self.pool.id())
            .field("enlisted", &self.registry.len())
            .finish()
    }
}

fn release_quietly(handle: &ConnectionHandle, txn: TransactionId) {
    if let Err(e) = handle.return_to_pool() {
        warn!(target: "xapool::datasource", %txn, error = %e, "Failed to release connection after aborted enlistment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use xapool_core::CompletionCallback;
    use xapool_pool::{MemoryConnectionFactory, PoolConfig};

    /// Transaction stub: one fixed transaction, callbacks held until `complete`
    #[derive(Default)]
    struct StubTransaction {
        current: Mutex<Option<TransactionId>>,
        callbacks: Mutex<Vec<CompletionCallback>>,
        refuse: Mutex<bool>,
    }

    impl StubTransaction {
        fn complete(&self, outcome: TransactionOutcome) -> Vec<Result<()>> {
            self.current.lock().take();
            let callbacks: Vec<_> = self.callbacks.lock().drain(..).collect();
            callbacks.into_iter().map(|cb| cb(outcome)).collect()
        }
    }

    impl AmbientTransaction for StubTransaction {
        fn current(&self) -> Option<TransactionId> {
            *self.current.lock()
        }

        fn register_completion(&self, txn: TransactionId, callback: CompletionCallback) -> Result<()> {
            if *self.refuse.lock() {
                return Err(Error::TransactionNotActive(txn));
            }
            self.callbacks.lock().push(callback);
            Ok(())
        }
    }

    fn create_coordinator(
        max_active: usize,
    ) -> (EnlistmentCoordinator, Arc<ConnectionPool>, Arc<StubTransaction>) {
        let factory = MemoryConnectionFactory::new("mem:enlist", "sa");
        let pool = Arc::new(ConnectionPool::new(PoolConfig::fixed(max_active), Arc::new(factory)).unwrap());
        let txm = Arc::new(StubTransaction::default());
        let coordinator = EnlistmentCoordinator::new(
            Arc::clone(&pool),
            Arc::new(ConnectionRegistry::new()),
            Arc::clone(&txm) as Arc<dyn AmbientTransaction>,
        );
        (coordinator, pool, txm)
    }

    #[test]
    fn test_same_transaction_same_connection() {
        let (coordinator, pool, txm) = create_coordinator(3);
        let txn = TransactionId::new(7);
        *txm.current.lock() = Some(txn);

        let first = coordinator.connection_for(txn).unwrap();
        let second = coordinator.connection_for(txn).unwrap();
        assert_eq!(first.physical_id().unwrap(), second.physical_id().unwrap());
        assert_eq!(pool.active_count(), 1);
        assert_eq!(txm.callbacks.lock().len(), 1);

        let results = txm.complete(TransactionOutcome::Committed);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(first.is_closed() && second.is_closed());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);

        let stats = coordinator.stats();
        assert_eq!(stats.enlisted, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.completed, 1);
        assert!(coordinator.registry.is_empty());
    }

    #[test]
    fn test_distinct_transactions_distinct_connections() {
        let (coordinator, pool, _txm) = create_coordinator(3);
        let a = coordinator.connection_for(TransactionId::new(1)).unwrap();
        let b = coordinator.connection_for(TransactionId::new(2)).unwrap();
        assert_ne!(a.physical_id().unwrap(), b.physical_id().unwrap());
        assert_eq!(pool.active_count(), 2);
        assert_eq!(coordinator.registry.len(), 2);
    }

    #[test]
    fn test_refused_registration_releases() {
        let (coordinator, pool, txm) = create_coordinator(2);
        *txm.refuse.lock() = true;

        let err = coordinator.connection_for(TransactionId::new(3)).unwrap_err();
        assert!(matches!(err, Error::TransactionNotActive(_)));
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert!(coordinator.registry.is_empty());
    }

    #[test]
    fn test_exhausted_pool_leaves_registry_clean() {
        let (coordinator, _pool, _txm) = create_coordinator(1);
        let _held = coordinator.connection_for(TransactionId::new(1)).unwrap();
        let err = coordinator.connection_for(TransactionId::new(2)).unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(coordinator.registry.len(), 1);
    }

    #[test]
    fn test_lookup_after_return_is_refused() {
        let (coordinator, _pool, txm) = create_coordinator(1);
        let txn = TransactionId::new(5);
        let _conn = coordinator.connection_for(txn).unwrap();

        // Simulate a lookup racing the completion: handle returned, entry still present
        let handle = coordinator.registry.lookup(txn, coordinator.pool.id()).unwrap();
        handle.return_to_pool().unwrap();
        assert!(matches!(
            coordinator.connection_for(txn),
            Err(Error::TransactionNotActive(t)) if t == txn
        ));

        txm.complete(TransactionOutcome::RolledBack);
        assert!(coordinator.registry.is_empty());
    }

    #[test]
    fn test_stats_serialize() {
        let (coordinator, _pool, _txm) = create_coordinator(1);
        let json = serde_json::to_value(coordinator.stats()).unwrap();
        assert_eq!(json["enlisted"], 0);
        assert_eq!(json["completion_failures"], 0);
    }
}

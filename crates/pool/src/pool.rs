//! Bounded connection pool
//!
//! Tracks idle and active physical connections for one datasource.
//!
//! # Accounting
//!
//! ```text
//! acquire():  idle ──pop──▶ active          (reuse)
//!             ∅ ──factory──▶ active         (grow, if idle + active < max_active)
//!             otherwise PoolExhausted       (fail fast, never waits)
//! release():  active ──push──▶ idle         (if idle < max_idle)
//!             active ──close──▶ ∅           (otherwise)
//! ```
//!
//! Connections being opened are counted against `max_active` while the
//! factory runs, so the bound holds at every instant.
//!
//! # Memory Ordering
//!
//! The lifetime counters (created, destroyed, borrowed, returned, exhausted)
//! use Relaxed ordering: they are observational and synchronize nothing.
//! The idle/active counts come from the locked state and are exact.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xapool_core::{
    ConnectionId, ConnectionMetadata, DataSourceConfig, Error, PhysicalConnection,
    PhysicalConnectionFactory, PoolId, Result,
};

/// Sizing and validation options for a [`ConnectionPool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections (idle + active)
    pub max_active: usize,
    /// Maximum idle connections kept after a return
    pub max_idle: usize,
    /// Connections opened at construction
    pub initial_size: usize,
    /// Validate idle connections before handing them out
    pub test_on_borrow: bool,
    /// Validate connections before idling them
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::from(&DataSourceConfig::default())
    }
}

impl From<&DataSourceConfig> for PoolConfig {
    fn from(config: &DataSourceConfig) -> Self {
        Self {
            max_active: config.max_active,
            max_idle: config.max_idle,
            initial_size: config.initial_size,
            test_on_borrow: config.test_on_borrow,
            test_on_return: config.test_on_return,
        }
    }
}

impl PoolConfig {
    /// Pool with `max_active == max_idle == size` and no prewarm
    pub fn fixed(size: usize) -> Self {
        Self {
            max_active: size,
            max_idle: size,
            initial_size: 0,
            test_on_borrow: false,
            test_on_return: false,
        }
    }

    /// Set the number of connections opened at construction
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Set the idle cap
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(Error::invalid_config("max_active must be at least 1"));
        }
        if self.initial_size > self.max_active {
            return Err(Error::invalid_config(format!(
                "initial_size ({}) exceeds max_active ({})",
                self.initial_size, self.max_active
            )));
        }
        if self.initial_size > self.max_idle {
            return Err(Error::invalid_config(format!(
                "initial_size ({}) exceeds max_idle ({})",
                self.initial_size, self.max_idle
            )));
        }
        Ok(())
    }
}

/// A physical connection owned by the pool or checked out of it
///
/// The [`ConnectionId`] is fixed at creation and survives every
/// borrow/return cycle.
pub struct PooledConnection {
    id: ConnectionId,
    pool_id: PoolId,
    conn: Box<dyn PhysicalConnection>,
}

impl PooledConnection {
    /// Identity of the physical connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pool that created this connection
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Driver metadata
    pub fn metadata(&self) -> ConnectionMetadata {
        self.conn.metadata()
    }

    /// Driver liveness check
    pub fn is_valid(&self) -> bool {
        self.conn.is_valid()
    }

    /// Mutably borrow the driver connection
    pub fn connection_mut(&mut self) -> &mut dyn PhysicalConnection {
        self.conn.as_mut()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("conn", &self.conn)
            .finish()
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool these numbers belong to
    pub pool_id: PoolId,
    /// Connections checked out
    pub active: usize,
    /// Connections held by the pool
    pub idle: usize,
    /// Configured bound on idle + active
    pub max_active: usize,
    /// Configured bound on idle after a return
    pub max_idle: usize,
    /// Physical connections ever opened
    pub total_created: u64,
    /// Physical connections closed by the pool
    pub total_destroyed: u64,
    /// Successful acquisitions
    pub total_borrowed: u64,
    /// Releases of active connections
    pub total_returned: u64,
    /// Acquisitions refused with `PoolExhausted`
    pub exhausted_count: u64,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<PooledConnection>,
    active: HashSet<ConnectionId>,
    /// Slots reserved by acquisitions whose factory call is in flight
    pending: usize,
    closed: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.pending
    }
}

/// Bounded pool of physical connections
///
/// Thread safety: every method takes `&self`; the pool is meant to be
/// shared behind an `Arc`.
pub struct ConnectionPool {
    id: PoolId,
    config: PoolConfig,
    factory: Arc<dyn PhysicalConnectionFactory>,
    state: Mutex<PoolState>,
    next_connection_id: AtomicU64,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    total_borrowed: AtomicU64,
    total_returned: AtomicU64,
    exhausted_count: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool and open `initial_size` idle connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for inconsistent sizing, or the
    /// factory's error if a prewarm connection cannot be opened (connections
    /// already opened are closed again).
    pub fn new(config: PoolConfig, factory: Arc<dyn PhysicalConnectionFactory>) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            id: PoolId::new(),
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            next_connection_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            total_borrowed: AtomicU64::new(0),
            total_returned: AtomicU64::new(0),
            exhausted_count: AtomicU64::new(0),
        };

        let mut warm = Vec::with_capacity(pool.config.initial_size);
        for _ in 0..pool.config.initial_size {
            match pool.open() {
                Ok(conn) => warm.push(conn),
                Err(e) => {
                    for conn in warm {
                        let _ = pool.destroy(conn, "prewarm aborted");
                    }
                    return Err(e);
                }
            }
        }
        pool.state.lock().idle = warm;

        info!(
            target: "xapool::pool",
            pool_id = %pool.id,
            max_active = pool.config.max_active,
            max_idle = pool.config.max_idle,
            initial_size = pool.config.initial_size,
            "Pool created"
        );
        Ok(pool)
    }

    /// Pool identity
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection.
    ///
    /// Reuses the most recently returned idle connection when there is one,
    /// otherwise opens a new one if the pool has room.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] when `max_active` connections exist and none is idle
    /// - [`Error::PoolClosed`] after [`ConnectionPool::close`]
    /// - the factory's error when a new connection cannot be opened
    pub fn acquire(&self) -> Result<PooledConnection> {
        loop {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::PoolClosed(self.id));
            }

            if let Some(conn) = state.idle.pop() {
                if !self.config.test_on_borrow {
                    return Ok(self.check_out(state, conn, "Reused idle connection"));
                }
                // Validate with the slot reserved and the lock released
                state.pending += 1;
                drop(state);
                if conn.is_valid() {
                    return self.finish_reserved(Ok(conn), "Reused idle connection");
                }
                self.state.lock().pending -= 1;
                let _ = self.destroy(conn, "failed validation on borrow");
                continue;
            }

            if state.total() >= self.config.max_active {
                drop(state);
                self.exhausted_count.fetch_add(1, Ordering::Relaxed);
                debug!(target: "xapool::pool", pool_id = %self.id, max_active = self.config.max_active, "Pool exhausted");
                return Err(Error::PoolExhausted {
                    max_active: self.config.max_active,
                });
            }

            state.pending += 1;
            break;
        }

        self.finish_reserved(self.open(), "Opened new connection")
    }

    /// Return a checked-out connection.
    ///
    /// The connection becomes idle if the pool is open, it passes validation
    /// (when `test_on_return` is set) and fewer than `max_idle` connections
    /// are idle. Otherwise it is closed.
    ///
    /// A connection that is not currently active in this pool is closed
    /// without touching the counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PhysicalClose`] if the connection had to be closed
    /// and the driver failed to close it. Accounting is already settled when
    /// this error is returned.
    pub fn release(&self, mut conn: PooledConnection) -> Result<()> {
        if conn.pool_id != self.id {
            warn!(target: "xapool::pool", pool_id = %self.id, conn = %conn.id, owner = %conn.pool_id, "Release of connection from another pool");
            return self.destroy(conn, "foreign connection");
        }

        let valid = !self.config.test_on_return || conn.is_valid();

        let mut state = self.state.lock();
        if !state.active.remove(&conn.id) {
            drop(state);
            warn!(target: "xapool::pool", pool_id = %self.id, conn = %conn.id, "Release of connection that is not active");
            return self.destroy(conn, "not active");
        }
        self.total_returned.fetch_add(1, Ordering::Relaxed);

        let reason = if state.closed {
            "pool closed"
        } else if !valid {
            "failed validation on return"
        } else if state.idle.len() >= self.config.max_idle {
            "idle limit reached"
        } else {
            let id = conn.id;
            state.idle.push(conn);
            let (active, idle) = (state.active.len(), state.idle.len());
            drop(state);
            debug!(target: "xapool::pool", pool_id = %self.id, conn = %id, active, idle, "Connection returned to idle");
            return Ok(());
        };
        drop(state);
        self.destroy(conn, reason)
    }

    /// Connections currently checked out
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Connections currently idle
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Whether [`ConnectionPool::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Snapshot of counts and lifetime counters
    pub fn stats(&self) -> PoolStats {
        let (active, idle) = {
            let state = self.state.lock();
            (state.active.len(), state.idle.len())
        };
        PoolStats {
            pool_id: self.id,
            active,
            idle,
            max_active: self.config.max_active,
            max_idle: self.config.max_idle,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
        }
    }

    /// Shut the pool down.
    ///
    /// Closes every idle connection now; active connections are closed when
    /// they are released. Further acquisitions fail with `PoolClosed`.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first close failure after attempting every connection.
    pub fn close(&self) -> Result<()> {
        let (drained, active) = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (std::mem::take(&mut state.idle), state.active.len())
        };

        info!(target: "xapool::pool", pool_id = %self.id, idle = drained.len(), active, "Pool closing");

        let mut first_err = None;
        for conn in drained {
            if let Err(e) = self.destroy(conn, "pool closed") {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Settle a reserved slot once the driver call is done.
    fn finish_reserved(
        &self,
        outcome: Result<PooledConnection>,
        event: &'static str,
    ) -> Result<PooledConnection> {
        let mut state = self.state.lock();
        state.pending -= 1;
        let conn = outcome?;
        if state.closed {
            drop(state);
            let _ = self.destroy(conn, "pool closed during checkout");
            return Err(Error::PoolClosed(self.id));
        }
        Ok(self.check_out(state, conn, event))
    }

    fn check_out(
        &self,
        mut state: MutexGuard<'_, PoolState>,
        conn: PooledConnection,
        event: &'static str,
    ) -> PooledConnection {
        state.active.insert(conn.id);
        let (active, idle) = (state.active.len(), state.idle.len());
        drop(state);

        self.total_borrowed.fetch_add(1, Ordering::Relaxed);
        debug!(target: "xapool::pool", pool_id = %self.id, conn = %conn.id, active, idle, "{}", event);
        conn
    }

    fn open(&self) -> Result<PooledConnection> {
        let conn = self.factory.create()?;
        self.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            id: ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed)),
            pool_id: self.id,
            conn,
        })
    }

    fn destroy(&self, mut conn: PooledConnection, reason: &'static str) -> Result<()> {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(target: "xapool::pool", pool_id = %self.id, conn = %conn.id, reason, "Closing physical connection");
        conn.conn.close().map_err(|e| {
            warn!(target: "xapool::pool", pool_id = %self.id, conn = %conn.id, error = %e, "Physical close failed");
            e
        })
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnectionFactory;

    fn create_pool(config: PoolConfig) -> (ConnectionPool, MemoryConnectionFactory) {
        let factory = MemoryConnectionFactory::new("mem:pool", "sa");
        let pool = ConnectionPool::new(config, Arc::new(factory.clone())).unwrap();
        (pool, factory)
    }

    static_assertions::assert_impl_all!(ConnectionPool: Send, Sync);
    static_assertions::assert_impl_all!(PooledConnection: Send);

    #[test]
    fn test_prewarm() {
        let (pool, factory) = create_pool(PoolConfig::fixed(25).with_initial_size(3));
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.created(), 3);
    }

    #[test]
    fn test_acquire_reuses_idle_before_opening() {
        let (pool, factory) = create_pool(PoolConfig::fixed(5).with_initial_size(1));

        let a = pool.acquire().unwrap();
        assert_eq!(factory.created(), 1);
        let b = pool.acquire().unwrap();
        assert_eq!(factory.created(), 2);
        assert_ne!(a.id(), b.id());

        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_connection_id_survives_return() {
        let (pool, _factory) = create_pool(PoolConfig::fixed(1));
        let first = pool.acquire().unwrap();
        let id = first.id();
        pool.release(first).unwrap();

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.pool_id(), pool.id());
        pool.release(again).unwrap();
    }

    #[test]
    fn test_exhausted_fails_fast() {
        let (pool, _factory) = create_pool(PoolConfig::fixed(2));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { max_active: 2 }));
        assert_eq!(pool.stats().exhausted_count, 1);

        pool.release(a).unwrap();
        let c = pool.acquire().unwrap();
        pool.release(b).unwrap();
        pool.release(c).unwrap();
    }

    #[test]
    fn test_release_above_max_idle_discards() {
        let (pool, factory) = create_pool(PoolConfig::fixed(4).with_max_idle(1));
        let conns: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        for conn in conns {
            pool.release(conn).unwrap();
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.open_connections(), 1);
        assert_eq!(pool.stats().total_destroyed, 3);
    }

    #[test]
    fn test_release_of_inactive_connection_keeps_counts() {
        let (pool, factory) = create_pool(PoolConfig::fixed(2));
        let (other, _) = create_pool(PoolConfig::fixed(2));

        // A connection from another pool is closed, not idled
        let foreign = other.acquire().unwrap();
        pool.release(foreign).unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);

        let conn = pool.acquire().unwrap();
        assert_eq!(pool.active_count(), 1);
        pool.release(conn).unwrap();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(factory.open_connections(), 1);
    }

    #[test]
    fn test_factory_failure_frees_reserved_slot() {
        let (pool, factory) = create_pool(PoolConfig::fixed(1));
        factory.set_fail_connect(true);
        assert!(matches!(pool.acquire(), Err(Error::Connect(_))));

        factory.set_fail_connect(false);
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.active_count(), 1);
        pool.release(conn).unwrap();
    }

    #[test]
    fn test_prewarm_failure_fails_construction() {
        let factory = MemoryConnectionFactory::new("mem:down", "sa");
        factory.set_fail_connect(true);
        let result = ConnectionPool::new(
            PoolConfig::fixed(3).with_initial_size(2),
            Arc::new(factory.clone()),
        );
        assert!(matches!(result, Err(Error::Connect(_))));
        assert_eq!(factory.open_connections(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let factory = Arc::new(MemoryConnectionFactory::new("mem:cfg", "sa"));
        assert!(matches!(
            ConnectionPool::new(PoolConfig::fixed(0), factory.clone()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectionPool::new(PoolConfig::fixed(1).with_initial_size(2), factory),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_prewarm_above_max_idle_rejected() {
        let factory = MemoryConnectionFactory::new("mem:cfg", "sa");
        let result = ConnectionPool::new(
            PoolConfig::fixed(5).with_max_idle(2).with_initial_size(5),
            Arc::new(factory.clone()),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn test_prewarm_at_max_idle_stays_capped() {
        let (pool, _factory) = create_pool(PoolConfig::fixed(5).with_max_idle(2).with_initial_size(2));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        for conn in [a, b, c] {
            pool.release(conn).unwrap();
            assert!(pool.idle_count() <= 2);
        }
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_borrow_validation_discards_broken_idle() {
        let mut config = PoolConfig::fixed(3).with_initial_size(2);
        config.test_on_borrow = true;
        let (pool, factory) = create_pool(config);

        factory.invalidate_all();
        let conn = pool.acquire().unwrap();
        assert!(conn.is_valid());
        assert_eq!(factory.created(), 3);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.open_connections(), 1);
        pool.release(conn).unwrap();
    }

    #[test]
    fn test_return_validation_discards_broken() {
        let mut config = PoolConfig::fixed(2);
        config.test_on_return = true;
        let (pool, factory) = create_pool(config);

        let conn = pool.acquire().unwrap();
        factory.invalidate_all();
        pool.release(conn).unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(factory.open_connections(), 0);
    }

    #[test]
    fn test_close_drains_idle_and_rejects_acquire() {
        let (pool, factory) = create_pool(PoolConfig::fixed(4).with_initial_size(2));
        let held = pool.acquire().unwrap();

        pool.close().unwrap();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.acquire(), Err(Error::PoolClosed(_))));

        // Active connection is closed when it comes back
        pool.release(held).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.open_connections(), 0);

        // Idempotent
        pool.close().unwrap();
    }

    #[test]
    fn test_close_failure_still_settles_accounting() {
        let (pool, factory) = create_pool(PoolConfig::fixed(2).with_max_idle(0));
        let conn = pool.acquire().unwrap();
        factory.set_fail_close(true);
        assert!(matches!(pool.release(conn), Err(Error::PhysicalClose(_))));
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_drop_closes_idle() {
        let factory = MemoryConnectionFactory::new("mem:drop", "sa");
        {
            let _pool =
                ConnectionPool::new(PoolConfig::fixed(3).with_initial_size(3), Arc::new(factory.clone()))
                    .unwrap();
            assert_eq!(factory.open_connections(), 3);
        }
        assert_eq!(factory.open_connections(), 0);
    }

    #[test]
    fn test_stats_serialize() {
        let (pool, _factory) = create_pool(PoolConfig::fixed(3).with_initial_size(1));
        let conn = pool.acquire().unwrap();
        pool.release(conn).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_borrowed, 1);
        assert_eq!(stats.total_returned, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["idle"], 1);
        assert_eq!(json["active"], 0);
        assert_eq!(json["max_active"], 3);
    }

    #[test]
    fn test_pool_config_from_datasource() {
        let ds = DataSourceConfig::new("xadb")
            .with_max_active(25)
            .with_max_idle(10)
            .with_initial_size(3)
            .with_test_on_return(true);
        let config = PoolConfig::from(&ds);
        assert_eq!(config.max_active, 25);
        assert_eq!(config.max_idle, 10);
        assert_eq!(config.initial_size, 3);
        assert!(config.test_on_return);
        assert!(!config.test_on_borrow);
    }
}

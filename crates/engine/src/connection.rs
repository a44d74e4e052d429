//! Connection handles
//!
//! Two layers:
//! - [`ConnectionHandle`]: owns one checked-out physical connection. Inside a
//!   transaction it is shared by every caller that asked for a connection
//!   from the same pool, and it sits in the transaction registry.
//! - [`ManagedConnection`]: what `get_connection()` returns. Each caller gets
//!   its own view with its own close flag, all pointing at the shared handle.
//!
//! ## State Machine (per view)
//!
//! ```text
//!                 close() [in txn]              completion callback
//! OpenActive ─────────────────────▶ LogicallyClosed ─────────────────▶ Returned
//!     │                                                                   ▲
//!     └──────────── close() [no txn] / completion callback ──────────────┘
//! ```
//!
//! The physical connection goes back to the pool exactly once: on explicit
//! close when no transaction owns it, otherwise from the completion callback.
//! Every transition is idempotent, so an application hook that closes the
//! connection during completion composes with the pool's own hook in any
//! order.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use xapool_core::{
    ConnectionId, ConnectionMetadata, Error, PhysicalConnection, PoolId, Result, TransactionId,
};
use xapool_pool::{ConnectionPool, PooledConnection};

/// Observable state of a [`ManagedConnection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Usable
    OpenActive,
    /// Closed by the caller; the transaction still holds the physical connection
    LogicallyClosed,
    /// Physical connection is back in the pool (terminal)
    Returned,
}

/// Owner of one checked-out physical connection
///
/// Opaque outside this crate; it appears in public signatures only as the
/// value type of [`crate::ConnectionRegistry`].
pub struct ConnectionHandle {
    pool: Arc<ConnectionPool>,
    owner: Option<TransactionId>,
    id: ConnectionId,
    /// `None` once returned
    physical: Mutex<Option<PooledConnection>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        owner: Option<TransactionId>,
        conn: PooledConnection,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            owner,
            id: conn.id(),
            physical: Mutex::new(Some(conn)),
        })
    }

    pub(crate) fn is_returned(&self) -> bool {
        self.physical.lock().is_none()
    }

    /// Give the physical connection back to the pool.
    ///
    /// Returns `Ok(false)` if it was already returned. A close failure on
    /// the way back is reported, but the handle counts as returned.
    pub(crate) fn return_to_pool(&self) -> Result<bool> {
        let conn = self.physical.lock().take();
        match conn {
            Some(conn) => {
                debug!(target: "xapool::datasource", conn = %self.id, owner = ?self.owner, "Returning connection to pool");
                self.pool.release(conn)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("pool_id", &self.pool.id())
            .field("owner", &self.owner)
            .field("returned", &self.is_returned())
            .finish()
    }
}

/// A logical connection handed to callers
///
/// Dropping a view that no transaction owns returns its connection, as if
/// `close()` had been called. Dropping a transaction-owned view does
/// nothing; the transaction's completion returns the connection.
pub struct ManagedConnection {
    handle: Arc<ConnectionHandle>,
    closed: AtomicBool,
}

impl ManagedConnection {
    pub(crate) fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            handle,
            closed: AtomicBool::new(false),
        }
    }

    /// Current state of this view
    ///
    /// A view with no owning transaction never reports `LogicallyClosed`:
    /// once its close flag is set it is `Returned`, even while the physical
    /// connection is still on its way back to the pool.
    pub fn state(&self) -> HandleState {
        let closed = self.closed.load(Ordering::SeqCst);
        if self.handle.is_returned() || (closed && self.handle.owner.is_none()) {
            HandleState::Returned
        } else if closed {
            HandleState::LogicallyClosed
        } else {
            HandleState::OpenActive
        }
    }

    /// True unless the view is open and its connection is still checked out
    pub fn is_closed(&self) -> bool {
        self.state() != HandleState::OpenActive
    }

    /// Close this view.
    ///
    /// Without a transaction the physical connection goes back to the pool.
    /// Inside a transaction the connection stays reserved for it, and later
    /// `get_connection()` calls in the same transaction get it again.
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PhysicalClose`] if the pool had to close the
    /// connection and the driver failed. The view is closed regardless.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.handle.owner {
            None => {
                self.handle.return_to_pool()?;
            }
            Some(txn) => {
                debug!(target: "xapool::datasource", %txn, conn = %self.handle.id, "Closed in transaction, connection stays enlisted");
            }
        }
        Ok(())
    }

    /// Identity of the underlying physical connection.
    ///
    /// Every view obtained within one transaction from one datasource
    /// reports the same id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if this view is closed.
    pub fn physical_id(&self) -> Result<ConnectionId> {
        self.ensure_open()?;
        Ok(self.handle.id)
    }

    /// Driver metadata; the usual way to force a connection into use.
    pub fn metadata(&self) -> Result<ConnectionMetadata> {
        self.with_physical(|conn| conn.metadata())
    }

    /// Run `f` against the driver connection.
    ///
    /// `f` runs while the handle is locked and must not call back into a
    /// view of the same connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if this view is closed.
    pub fn with_physical<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn PhysicalConnection) -> R,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let mut guard = self.handle.physical.lock();
        match guard.as_mut() {
            Some(conn) => Ok(f(conn.connection_mut())),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Transaction holding this connection, if any
    pub fn owning_transaction(&self) -> Option<TransactionId> {
        self.handle.owner
    }

    /// Pool the connection came from
    pub fn pool_id(&self) -> PoolId {
        self.handle.pool.id()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            HandleState::OpenActive => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        if self.handle.owner.is_none() && !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                warn!(target: "xapool::datasource", conn = %self.handle.id, error = %e, "Close on drop failed");
            }
        }
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("conn", &self.handle.id)
            .field("owner", &self.handle.owner)
            .field("state", &self.state())
            .finish()
    }
}

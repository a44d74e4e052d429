//! Transaction enlistment registry
//!
//! Maps `(TransactionId, PoolId)` to the connection handle that transaction
//! holds for that pool. At most one entry exists per key; that single entry
//! is what makes every `get_connection()` inside a transaction land on the
//! same physical connection.
//!
//! Entries for different transactions live in independent shards and can be
//! touched concurrently. Every operation is a single map access.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use xapool_core::{Error, PoolId, Result, TransactionId};

/// Registry of handles enlisted in active transactions
///
/// Generic over the handle type so the engine decides what it stores; the
/// registry only needs to hand out clones on lookup.
pub struct TransactionRegistry<H> {
    entries: DashMap<(TransactionId, PoolId), H>,
}

impl<H: Clone> TransactionRegistry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Handle enlisted by `txn` for `pool`, if any
    pub fn lookup(&self, txn: TransactionId, pool: PoolId) -> Option<H> {
        self.entries.get(&(txn, pool)).map(|entry| entry.value().clone())
    }

    /// Record that `txn` holds `handle` for `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyEnlisted`] if the key is taken. The existing
    /// entry is left untouched.
    pub fn enlist(&self, txn: TransactionId, pool: PoolId, handle: H) -> Result<()> {
        match self.entries.entry((txn, pool)) {
            Entry::Occupied(_) => Err(Error::AlreadyEnlisted { txn, pool }),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the entry for `(txn, pool)`. No-op if absent.
    pub fn delist(&self, txn: TransactionId, pool: PoolId) -> Option<H> {
        self.entries.remove(&(txn, pool)).map(|(_, handle)| handle)
    }

    /// Pools `txn` currently holds connections from
    pub fn enlisted_in(&self, txn: TransactionId) -> Vec<PoolId> {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == txn)
            .map(|entry| entry.key().1)
            .collect()
    }

    /// Number of live enlistments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no transaction holds a connection
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Clone> Default for TransactionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for TransactionRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

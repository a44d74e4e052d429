//! Identity types for pools, transactions and connections
//!
//! This module defines:
//! - PoolId: Unique identifier for a connection pool
//! - TransactionId: Identifier of an ambient transaction
//! - ConnectionId: Identity of a pooled physical connection
//! - TransactionOutcome: How a transaction finished

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a connection pool
///
/// A PoolId is a wrapper around a UUID v4. Together with a TransactionId it
/// keys transaction enlistments, so two datasources never share a slot even
/// when they point at the same database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Create a new random PoolId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a transaction
///
/// Allocated monotonically by the transaction manager. Never reused within
/// a manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw transaction number
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw transaction number
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Identity of a physical connection inside its pool
///
/// Assigned once when the pool creates the connection and kept for the
/// connection's whole life, across every borrow/return cycle. Two handles
/// wrapping the same physical connection report the same ConnectionId.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw connection number
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw connection number
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Final outcome of a transaction, passed to completion callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionOutcome {
    /// All work was committed
    Committed,
    /// The transaction was rolled back (explicitly, rollback-only or timeout)
    RolledBack,
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Committed => write!(f, "committed"),
            TransactionOutcome::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pool_id_uniqueness() {
        let ids: HashSet<PoolId> = (0..100).map(|_| PoolId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_pool_id_display() {
        let id = PoolId::new();
        let printed = id.to_string();
        assert_eq!(printed.len(), 36);
        assert_eq!(printed, id.to_string());
        assert_ne!(printed, PoolId::new().to_string());
    }

    #[test]
    fn test_transaction_id_display_and_order() {
        let a = TransactionId::new(1);
        let b = TransactionId::new(2);
        assert!(a < b);
        assert_eq!(a.to_string(), "txn-1");
        assert_eq!(b.as_u64(), 2);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
        assert_eq!(ConnectionId::new(42), ConnectionId::new(42));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(TransactionOutcome::Committed.to_string(), "committed");
        assert_eq!(TransactionOutcome::RolledBack.to_string(), "rolled back");
    }
}

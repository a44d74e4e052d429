//! Local transaction manager
//!
//! Provides thread-associated transactions with completion callbacks:
//! 1. `begin()` associates a new transaction with the calling thread
//! 2. resources register completion callbacks while the transaction runs
//! 3. `commit()` / `rollback()` detach the transaction and run every
//!    callback exactly once with the outcome
//!
//! ## Lifecycle
//!
//! ```text
//! begin ──▶ Active ──set_rollback_only──▶ MarkedRollback
//!             │                                │
//!          commit/rollback                 commit/rollback
//!             ▼                                ▼
//!        callbacks(Committed|RolledBack)   callbacks(RolledBack)
//! ```
//!
//! A transaction that outlives its timeout is rolled back by
//! `expire_timed_out()`, which may run on any thread. The owner finds out on
//! its next `commit()` / `rollback()`.
//!
//! Callback failures are logged and collected in the [`CompletionReport`];
//! they never change the outcome and never stop later callbacks.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use xapool_core::{
    AmbientTransaction, CompletionCallback, Error, Result, TransactionId, TransactionOutcome,
};

/// Status of a transaction that has not completed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Running; may commit
    Active,
    /// Running; will roll back whatever the caller asks for
    MarkedRollback,
}

struct TransactionState {
    thread: ThreadId,
    status: TransactionStatus,
    started_at: Instant,
    timeout: Option<Duration>,
    callbacks: Vec<CompletionCallback>,
}

impl TransactionState {
    fn is_expired(&self, now: Instant) -> bool {
        self.timeout
            .map(|timeout| now.duration_since(self.started_at) > timeout)
            .unwrap_or(false)
    }
}

/// Left for a thread whose transaction the reaper rolled back
struct ExpiredNotice {
    txn: TransactionId,
    reaped_at: Instant,
    /// The transaction's own timeout; the notice is dropped once it is this old
    keep_for: Duration,
}

impl ExpiredNotice {
    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.reaped_at) > self.keep_for
    }
}

/// What happened when a transaction completed
#[derive(Debug)]
pub struct CompletionReport {
    /// Completed transaction
    pub txn: TransactionId,
    /// Outcome passed to the callbacks
    pub outcome: TransactionOutcome,
    /// Number of callbacks invoked
    pub callbacks_run: usize,
    /// Errors returned by callbacks, in invocation order
    pub failures: Vec<Error>,
}

impl CompletionReport {
    /// True when every callback succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Transaction statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionMetrics {
    /// Transactions begun and not yet completed
    pub active_count: u64,
    /// Total transactions begun
    pub total_started: u64,
    /// Total committed
    pub total_committed: u64,
    /// Total rolled back, including timeouts and rollback-only commits
    pub total_rolled_back: u64,
    /// Rolled back because the timeout elapsed
    pub total_timed_out: u64,
    /// Completion callbacks that returned an error
    pub callback_failures: u64,
}

/// Thread-associated transaction manager
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational and
/// synchronize nothing. Transaction state is guarded by the maps and the
/// per-transaction mutex.
pub struct LocalTransactionManager {
    next_txn_id: AtomicU64,
    default_timeout: Option<Duration>,
    /// Thread → its current transaction
    associations: DashMap<ThreadId, TransactionId>,
    /// Transactions that have not completed
    transactions: DashMap<TransactionId, Mutex<TransactionState>>,
    /// Threads whose transaction was rolled back by the timeout reaper
    expired: DashMap<ThreadId, ExpiredNotice>,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    total_timed_out: AtomicU64,
    callback_failures: AtomicU64,
}

impl LocalTransactionManager {
    /// Create a manager whose transactions never time out
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            default_timeout: None,
            associations: DashMap::new(),
            transactions: DashMap::new(),
            expired: DashMap::new(),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_rolled_back: AtomicU64::new(0),
            total_timed_out: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
        }
    }

    /// Create a manager applying `timeout` to every transaction
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Begin a transaction on the calling thread with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionActive`] if the thread already has one.
    pub fn begin(&self) -> Result<TransactionId> {
        self.begin_with_timeout(self.default_timeout)
    }

    /// Begin a transaction on the calling thread with an explicit timeout.
    pub fn begin_with_timeout(&self, timeout: Option<Duration>) -> Result<TransactionId> {
        let thread = thread::current().id();
        if let Some(existing) = self.associations.get(&thread) {
            return Err(Error::TransactionActive(*existing));
        }
        self.expired.remove(&thread);

        let txn = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.transactions.insert(
            txn,
            Mutex::new(TransactionState {
                thread,
                status: TransactionStatus::Active,
                started_at: Instant::now(),
                timeout,
                callbacks: Vec::new(),
            }),
        );
        self.associations.insert(thread, txn);
        self.total_started.fetch_add(1, Ordering::Relaxed);

        debug!(target: "xapool::txn", %txn, ?timeout, "Transaction started");
        Ok(txn)
    }

    /// Commit the calling thread's transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::NoTransaction`] if the thread has no transaction
    /// - [`Error::RolledBack`] if it was marked rollback-only (it is rolled back)
    /// - [`Error::TransactionTimedOut`] if it outlived its timeout (it is rolled back)
    pub fn commit(&self) -> Result<CompletionReport> {
        let txn = self.disassociate()?;
        let state = self.take(txn)?;

        if state.is_expired(Instant::now()) {
            self.total_timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(target: "xapool::txn", %txn, "Commit after timeout, rolling back");
            self.finish(txn, state, TransactionOutcome::RolledBack);
            return Err(Error::TransactionTimedOut(txn));
        }
        if state.status == TransactionStatus::MarkedRollback {
            info!(target: "xapool::txn", %txn, "Commit of rollback-only transaction, rolling back");
            self.finish(txn, state, TransactionOutcome::RolledBack);
            return Err(Error::RolledBack(txn));
        }

        let report = self.finish(txn, state, TransactionOutcome::Committed);
        info!(target: "xapool::txn", %txn, "Transaction committed");
        Ok(report)
    }

    /// Roll back the calling thread's transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::NoTransaction`] if the thread has no transaction
    /// - [`Error::TransactionTimedOut`] if the reaper already rolled it back
    pub fn rollback(&self) -> Result<CompletionReport> {
        let txn = self.disassociate()?;
        let state = self.take(txn)?;
        let report = self.finish(txn, state, TransactionOutcome::RolledBack);
        info!(target: "xapool::txn", %txn, "Transaction rolled back");
        Ok(report)
    }

    /// Doom the calling thread's transaction: it can only roll back.
    pub fn set_rollback_only(&self) -> Result<()> {
        let txn = self.current().ok_or(Error::NoTransaction)?;
        let entry = self
            .transactions
            .get(&txn)
            .ok_or(Error::TransactionNotActive(txn))?;
        entry.lock().status = TransactionStatus::MarkedRollback;
        debug!(target: "xapool::txn", %txn, "Transaction marked rollback-only");
        Ok(())
    }

    /// Status of `txn`, or `None` once it has completed
    pub fn status(&self, txn: TransactionId) -> Option<TransactionStatus> {
        let entry = self.transactions.get(&txn)?;
        let state = entry.lock();
        Some(state.status)
    }

    /// Run `f` inside a transaction.
    ///
    /// Joins the calling thread's transaction if there is one. Otherwise
    /// begins a new one, commits it when `f` succeeds and rolls it back when
    /// `f` fails.
    pub fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TransactionId) -> Result<T>,
    {
        if let Some(txn) = self.current() {
            return f(txn);
        }

        let txn = self.begin()?;
        match f(txn) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(target: "xapool::txn", %txn, error = %rollback_err, "Rollback after failure did not complete");
                }
                Err(e)
            }
        }
    }

    /// Roll back every transaction that outlived its timeout.
    ///
    /// Callbacks run on the calling thread. The owning threads lose their
    /// association; their next `commit()` or `rollback()` reports
    /// [`Error::TransactionTimedOut`], provided it comes within one timeout
    /// period of the rollback. Older notices are discarded here, so threads
    /// that exit without completing leave nothing behind.
    pub fn expire_timed_out(&self) -> Vec<CompletionReport> {
        let now = Instant::now();
        self.expired.retain(|_, notice| !notice.is_stale(now));

        let expired: Vec<(TransactionId, ThreadId)> = self
            .transactions
            .iter()
            .filter_map(|entry| {
                let state = entry.value().lock();
                state.is_expired(now).then(|| (*entry.key(), state.thread))
            })
            .collect();

        let mut reports = Vec::with_capacity(expired.len());
        for (txn, thread) in expired {
            let Some((_, state)) = self.transactions.remove(&txn) else {
                // Completed by its owner in the meantime
                continue;
            };
            let state = state.into_inner();
            if self
                .associations
                .remove_if(&thread, |_, current| *current == txn)
                .is_some()
            {
                let notice = ExpiredNotice {
                    txn,
                    reaped_at: now,
                    keep_for: state.timeout.unwrap_or_default(),
                };
                self.expired.insert(thread, notice);
            }
            self.total_timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(target: "xapool::txn", %txn, "Transaction timed out, rolling back");
            reports.push(self.finish(txn, state, TransactionOutcome::RolledBack));
        }
        reports
    }

    /// Transactions begun and not yet completed
    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    /// Snapshot of transaction statistics
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            active_count: self.transactions.len() as u64,
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: self.total_committed.load(Ordering::Relaxed),
            total_rolled_back: self.total_rolled_back.load(Ordering::Relaxed),
            total_timed_out: self.total_timed_out.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }

    fn disassociate(&self) -> Result<TransactionId> {
        let thread = thread::current().id();
        if let Some((_, txn)) = self.associations.remove(&thread) {
            return Ok(txn);
        }
        match self.expired.remove(&thread) {
            Some((_, notice)) => Err(Error::TransactionTimedOut(notice.txn)),
            None => Err(Error::NoTransaction),
        }
    }

    fn take(&self, txn: TransactionId) -> Result<TransactionState> {
        // Only the reaper removes a transaction it does not own
        self.transactions
            .remove(&txn)
            .map(|(_, state)| state.into_inner())
            .ok_or(Error::TransactionTimedOut(txn))
    }

    fn finish(
        &self,
        txn: TransactionId,
        state: TransactionState,
        outcome: TransactionOutcome,
    ) -> CompletionReport {
        match outcome {
            TransactionOutcome::Committed => self.total_committed.fetch_add(1, Ordering::Relaxed),
            TransactionOutcome::RolledBack => self.total_rolled_back.fetch_add(1, Ordering::Relaxed),
        };

        let callbacks_run = state.callbacks.len();
        let mut failures = Vec::new();
        for callback in state.callbacks {
            if let Err(e) = callback(outcome) {
                self.callback_failures.fetch_add(1, Ordering::Relaxed);
                warn!(target: "xapool::txn", %txn, %outcome, error = %e, "Completion callback failed");
                failures.push(e);
            }
        }

        debug!(target: "xapool::txn", %txn, %outcome, callbacks_run, failures = failures.len(), "Transaction completed");
        CompletionReport {
            txn,
            outcome,
            callbacks_run,
            failures,
        }
    }
}

impl Default for LocalTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransactionManager")
            .field("active", &self.transactions.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl AmbientTransaction for LocalTransactionManager {
    fn current(&self) -> Option<TransactionId> {
        self.associations
            .get(&thread::current().id())
            .map(|entry| *entry.value())
    }

    fn register_completion(&self, txn: TransactionId, callback: CompletionCallback) -> Result<()> {
        let entry = self
            .transactions
            .get(&txn)
            .ok_or(Error::TransactionNotActive(txn))?;
        entry.lock().callbacks.push(callback);
        Ok(())
    }
}

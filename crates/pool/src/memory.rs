//! In-memory driver
//!
//! Connections are plain structs; nothing leaves the process. The factory
//! keeps counters for how many connections are physically open and lets
//! tests inject faults (refuse to connect, fail on close, invalidate every
//! existing connection).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;
use xapool_core::{ConnectionMetadata, Error, PhysicalConnection, PhysicalConnectionFactory, Result};

/// Product name reported by in-memory connections.
pub const MEMORY_PRODUCT_NAME: &str = "xapool in-memory";

#[derive(Debug, Default)]
struct Shared {
    created: AtomicU64,
    open: AtomicUsize,
    generation: AtomicU64,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
}

/// Factory for [`MemoryConnection`]s.
#[derive(Debug, Clone)]
pub struct MemoryConnectionFactory {
    url: String,
    user: String,
    shared: Arc<Shared>,
}

impl MemoryConnectionFactory {
    /// Create a factory reporting the given URL and user in metadata
    pub fn new(url: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Total connections ever opened
    pub fn created(&self) -> u64 {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Make subsequent `create()` calls fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `close()` calls report an error
    pub fn set_fail_close(&self, fail: bool) {
        self.shared.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Mark every connection opened so far as broken
    pub fn invalidate_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl PhysicalConnectionFactory for MemoryConnectionFactory {
    fn create(&self) -> Result<Box<dyn PhysicalConnection>> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connect(format!("{}: connection refused", self.url)));
        }
        let serial = self.shared.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        trace!(target: "xapool::memory", serial, url = %self.url, "opened");
        Ok(Box::new(MemoryConnection {
            serial,
            generation: self.shared.generation.load(Ordering::SeqCst),
            url: self.url.clone(),
            user: self.user.clone(),
            closed: false,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// A connection produced by [`MemoryConnectionFactory`]
#[derive(Debug)]
pub struct MemoryConnection {
    serial: u64,
    generation: u64,
    url: String,
    user: String,
    closed: bool,
    shared: Arc<Shared>,
}

impl PhysicalConnection for MemoryConnection {
    fn metadata(&self) -> ConnectionMetadata {
        ConnectionMetadata {
            url: self.url.clone(),
            user: self.user.clone(),
            product_name: MEMORY_PRODUCT_NAME.to_string(),
        }
    }

    fn is_valid(&self) -> bool {
        !self.closed && self.generation == self.shared.generation.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
        trace!(target: "xapool::memory", serial = self.serial, "closed");
        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(Error::physical_close(format!(
                "{}: connection {} reset during close",
                self.url, self.serial
            )));
        }
        Ok(())
    }
}

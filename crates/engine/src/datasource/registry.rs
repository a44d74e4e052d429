//! Process-wide datasource names
//!
//! Resolves resource names such as `"xadb"` to a live datasource.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use xapool_core::{Error, Result};

use super::ManagedDataSource;

// Entries are weak: the registry never keeps a datasource (and its pool)
// alive. A dead entry is treated as absent and replaced on registration.
//
// parking_lot::Mutex so one panicking test cannot poison the registry for
// the rest of the process.

/// Registered datasources (name -> weak reference)
static DATASOURCES: Lazy<Mutex<HashMap<String, Weak<ManagedDataSource>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register `datasource` under its configured name.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if a live datasource already holds the
/// name.
pub fn register_datasource(datasource: &Arc<ManagedDataSource>) -> Result<()> {
    let name = datasource.name().to_string();
    let mut registry = DATASOURCES.lock();
    if let Some(existing) = registry.get(&name).and_then(Weak::upgrade) {
        if !Arc::ptr_eq(&existing, datasource) {
            return Err(Error::invalid_config(format!(
                "datasource name '{}' is already registered",
                name
            )));
        }
    }
    debug!(target: "xapool::datasource", %name, "Datasource registered");
    registry.insert(name, Arc::downgrade(datasource));
    Ok(())
}

/// Look up a registered datasource by name
pub fn lookup_datasource(name: &str) -> Option<Arc<ManagedDataSource>> {
    let mut registry = DATASOURCES.lock();
    match registry.get(name).map(Weak::upgrade) {
        Some(Some(datasource)) => Some(datasource),
        Some(None) => {
            registry.remove(name);
            None
        }
        None => None,
    }
}

/// Remove `name` from the registry, returning the datasource if it was live
pub fn unregister_datasource(name: &str) -> Option<Arc<ManagedDataSource>> {
    DATASOURCES.lock().remove(name).and_then(|weak| weak.upgrade())
}

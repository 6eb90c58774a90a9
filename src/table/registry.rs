use lazy_static::lazy_static;
use log::debug;

use std::{
    collections::BTreeMap,
    ffi,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    table::{
        table::{lock_inner, Inner},
        Stats,
    },
    Result,
};

lazy_static! {
    static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

/// Registry of open tables, keyed by file location. Used to report
/// memory statistics for all tables in the process.
///
/// Registry only holds weak references, a table that is dropped without
/// closing will simply vanish from the registry.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<BTreeMap<ffi::OsString, Weak<Mutex<Inner>>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Process wide registry, used by [Table::open][crate::table::Table::open].
    pub fn global() -> Arc<Registry> {
        Arc::clone(&REGISTRY)
    }

    pub(crate) fn register(&self, loc: &ffi::OsStr, inner: &Arc<Mutex<Inner>>) -> Result<()> {
        let mut tables = err_at!(Fatal, self.tables.lock())?;
        debug!(target: "table", "{:?} registered", loc);
        tables.insert(loc.to_os_string(), Arc::downgrade(inner));
        Ok(())
    }

    pub(crate) fn unregister(&self, loc: &ffi::OsStr) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.remove(loc);
        }
    }

    /// Return locations of tables that are currently open.
    pub fn to_locations(&self) -> Result<Vec<ffi::OsString>> {
        let tables = err_at!(Fatal, self.tables.lock())?;
        let locs = tables
            .iter()
            .filter(|(_, inner)| inner.strong_count() > 0)
            .map(|(loc, _)| loc.clone())
            .collect();
        Ok(locs)
    }

    /// Return memory statistics for table at `loc`, None if the table is
    /// not open.
    pub fn memory_stats(&self, loc: &ffi::OsStr) -> Result<Option<Stats>> {
        let inner = {
            let tables = err_at!(Fatal, self.tables.lock())?;
            match tables.get(loc).and_then(|inner| inner.upgrade()) {
                Some(inner) => inner,
                None => return Ok(None),
            }
        };
        let inner = lock_inner(&inner)?;
        if inner.is_closed() {
            Ok(None)
        } else {
            Ok(Some(inner.to_stats()))
        }
    }
}

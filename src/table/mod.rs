//! Module implement [Table], a single file fixed-record table.
//!
//! A table owns one record file, one in-memory [PrimaryIndex] and an
//! optional tail-cache. Following invariant holds after every operation:
//!
//! ```text
//! records.size() == index.size() == tail_cache.len(), if tail-cache is enabled.
//! ```
//!
//! Slots are densely packed. Removing a row moves the last row into the
//! freed slot and truncates the record file by one record.
//!
//! **Memory**
//!
//! While opening a table, memory needed for the index and the
//! tail-cache is estimated, using [MemoryHints][crate::MemoryHints]. Tail-cache
//! is optional and is abandoned whenever memory runs short, the index is
//! mandatory and opening fails with `OutOfMemory` if it does not fit.
//!
//! [PrimaryIndex]: crate::index::PrimaryIndex

use log::{error, info};

use std::{ffi, path};

use crate::{util::files, Result, RowLayout};

mod cache;
mod config;
mod iter;
mod registry;
mod table;

pub use config::Config;
pub use iter::{Iter, Keys, Rows};
pub use registry::Registry;
pub use table::Table;

const MB: u64 = 1024 * 1024;

/// Upper limit for number of tail-cache entries, unless `large_index` is
/// configured.
pub const MAX_ARRAY_LEN: u64 = 134_217_727;
/// Tail-cache is considered only if more than this much memory is available.
pub const CACHE_MIN_AVAILABLE: u64 = 600 * MB;
/// Lower bound for memory that must remain available to keep a tail-cache.
pub const MIN_REMAINING: u64 = 200 * MB;
/// Number of entries fetched under a single lock while iterating.
pub const ITER_BATCH: usize = 100;

const CACHE_RAM_BASE: u64 = 200 * MB;
const INDEX_RAM_BASE: u64 = 100 * MB;
// bytes accounted for every slot handle.
const HANDLE_SIZE: u64 = 4;
const GROWTH_FACTOR_100: u64 = 140;

/// Statistics for a single table.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Stats {
    /// Number of rows in table.
    pub n_count: usize,
    /// Bytes accounted for every index entry.
    pub key_chunk_size: usize,
    /// Bytes accounted for the whole index.
    pub key_mem: usize,
    /// Bytes of every tail-cache entry, ZERO if tail-cache is disabled.
    pub value_chunk_size: usize,
    /// Bytes held by tail-cache, ZERO if tail-cache is disabled.
    pub value_mem: usize,
}

/// Return the number of records in file `loc`, ZERO if missing. If file
/// length is not a multiple of `record_size` and `fix` is true, file is
/// truncated to the nearest multiple, else fail with `CorruptSize`.
pub fn table_size(loc: &ffi::OsStr, record_size: usize, fix: bool) -> Result<u64> {
    if record_size == 0 {
        err_at!(InvalidInput, msg: "zero record size for {:?}", loc)?
    }

    let (len, rs) = (files::file_len(loc)?, record_size as u64);
    match len % rs {
        0 => Ok(len / rs),
        cut if fix => {
            error!(target: "table", "{:?} broken size {}, truncate by {}", loc, len, cut);
            files::truncate_file(loc, len - cut)?;
            info!(target: "table", "{:?} fixed size to {}", loc, len - cut);
            Ok(len / rs)
        }
        _ => err_at!(CorruptSize, msg: "{:?} len {} record size {}", loc, len, rs),
    }
}

/// Return the memory, in bytes, needed to index file `loc`.
pub fn static_index_need(loc: &ffi::OsStr, layout: &RowLayout) -> Result<u64> {
    let n = table_size(loc, layout.to_record_size(), true)?;
    let entry = (layout.key_len as u64) + HANDLE_SIZE;
    Ok(entry.saturating_mul(n).saturating_mul(GROWTH_FACTOR_100) / 100)
}

// memory needed for a tail-cache of `n` rows, including a safety margin.
fn tail_cache_need(layout: &RowLayout, n: u64) -> u64 {
    let entry = (layout.to_record_size() as u64) + HANDLE_SIZE;
    CACHE_RAM_BASE.saturating_add(entry.saturating_mul(n).saturating_mul(3) / 2)
}

// memory needed for an index of `n` keys, including a safety margin.
fn index_need(layout: &RowLayout, n: u64) -> u64 {
    let entry = (layout.key_len as u64) + HANDLE_SIZE;
    INDEX_RAM_BASE.saturating_add(entry.saturating_mul(n).saturating_mul(3) / 2)
}

fn file_exists(loc: &ffi::OsStr) -> bool {
    path::Path::new(loc).exists()
}

#[cfg(test)]
#[path = "table_test.rs"]
mod table_test;

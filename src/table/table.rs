use log::{debug, error, info, warn};

use std::{
    cmp,
    collections::BTreeSet,
    convert::TryFrom,
    ffi,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    index::PrimaryIndex,
    store::{ChunkReader, Records},
    table::{self, cache::TailCache, Config, Iter, Keys, Registry, Rows, Stats},
    MemoryHints, Result, Row, RowLayout, SlotIndex, SysMemory,
};

/// Fixed-record table backed by a single file.
///
/// All operations are serialized on a per-table mutex. Table can be
/// shared across threads by wrapping it in an [Arc].
pub struct Table {
    loc: ffi::OsString,
    layout: RowLayout,
    inner: Arc<Mutex<Inner>>,
    registry: Arc<Registry>,
}

pub(crate) struct Inner {
    loc: ffi::OsString,
    layout: RowLayout,
    records: Option<Records>,
    index: PrimaryIndex,
    cache: Option<TailCache>,
    hints: Arc<dyn MemoryHints>,
    min_remaining: u64,
    // bumped on every change to slot layout.
    epoch: u64,
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(err) = self.do_close() {
            error!(target: "table", "{:?} close on drop {}", self.loc, err);
        }
    }
}

impl Table {
    /// Open table at file `loc`, creating an empty file if missing. Use
    /// system memory hints and the process wide registry.
    pub fn open(loc: &ffi::OsStr, config: Config) -> Result<Table> {
        let hints: Arc<dyn MemoryHints> = Arc::new(SysMemory::default());
        Table::open_with(loc, config, hints, Registry::global())
    }

    /// Open table at file `loc`, using the supplied memory `hints` and
    /// `registry`.
    pub fn open_with(
        loc: &ffi::OsStr,
        config: Config,
        hints: Arc<dyn MemoryHints>,
        registry: Arc<Registry>,
    ) -> Result<Table> {
        let layout = config.layout;
        layout.validate()?;
        let record_size = layout.to_record_size();

        let fresh = !table::file_exists(loc);
        let n_file = table::table_size(loc, record_size, true)?;
        let records = Records::open(loc, record_size, config.buffer_size)?;
        if records.size() != n_file {
            err_at!(Fatal, msg: "{:?} size {} != {}", loc, records.size(), n_file)?
        }

        let avail = hints.available();
        let min_remaining = cmp::max(table::MIN_REMAINING, avail / 10);
        let n_alloc = cmp::max(n_file, config.initial_capacity as u64);
        let cache_need = table::tail_cache_need(&layout, n_alloc);
        let index_need = table::index_need(&layout, n_alloc);

        let mut cache = {
            let bounded = config.large_index || n_alloc < table::MAX_ARRAY_LEN;
            let enough = avail > table::CACHE_MIN_AVAILABLE && avail >= cache_need;
            if config.tail_cache && bounded && enough {
                let capacity = err_at!(FailConvert, usize::try_from(n_alloc))?;
                match TailCache::new(layout.tail_len, capacity) {
                    Ok(cache) => Some(cache),
                    Err(err) => {
                        warn!(target: "table", "{:?} tail-cache disabled {}", loc, err);
                        None
                    }
                }
            } else {
                None
            }
        };
        info!(
            target: "table",
            "{:?} open records:{} tail-cache:{} available:{}MB need:{}MB",
            loc, n_file, cache.is_some(), avail / table::MB, cache_need / table::MB
        );

        if n_alloc > 0 && cache.is_some() && avail.saturating_sub(cache_need) < index_need {
            error!(
                target: "table",
                "{:?} not enough memory for index, need:{}MB, dropping tail-cache",
                loc, index_need / table::MB
            );
            cache = None;
        }
        if n_alloc > 0 && avail < index_need {
            err_at!(
                OutOfMemory, msg: "{:?} index need {} available {}", loc, index_need, avail
            )?
        }

        let mut inner = Inner {
            loc: loc.to_os_string(),
            layout,
            records: Some(records),
            index: PrimaryIndex::new(layout.order, layout.key_len),
            cache,
            hints,
            min_remaining,
            epoch: 0,
        };
        let quarantine = inner.load()?;
        inner.repair_malformed(quarantine)?;
        if config.warm_up && !fresh {
            inner.warm_up()?;
        }
        inner.check_invariant()?;

        let inner = Arc::new(Mutex::new(inner));
        registry.register(loc, &inner)?;

        Ok(Table {
            loc: loc.to_os_string(),
            layout,
            inner,
            registry,
        })
    }

    /// Flush, close the record file and release the in-memory index and
    /// tail-cache.
    pub fn close(self) -> Result<()> {
        self.do_close()
    }

    fn do_close(&self) -> Result<()> {
        let records = {
            let mut inner = self.lock()?;
            inner.index.clear();
            inner.cache = None;
            inner.epoch += 1;
            inner.records.take()
        };
        match records {
            Some(records) => {
                self.registry.unregister(&self.loc);
                debug!(target: "table", "{:?} closed", self.loc);
                records.close()
            }
            None => Ok(()),
        }
    }

    /// Purge the table, close and remove its file from disk.
    pub fn purge(self) -> Result<()> {
        self.do_close()?;
        crate::util::files::remove_file(&self.loc)
    }

    fn lock(&self) -> Result<MutexGuard<Inner>> {
        lock_inner(&self.inner)
    }
}

impl Table {
    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    pub fn to_layout(&self) -> RowLayout {
        self.layout
    }

    /// Number of rows in table.
    pub fn size(&self) -> Result<usize> {
        Ok(self.lock()?.index.size())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lock()?.index.has(key))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        self.lock()?.get(key)
    }

    /// Insert or update `row`. Return true if row was inserted.
    pub fn put(&self, row: Row) -> Result<bool> {
        self.layout.check_row(&row)?;
        let mut inner = self.lock()?;
        let res = match inner.index.get(row.as_key()) {
            Some(slot) => inner.update(slot, &row).map(|_| false),
            None => inner.append(&row).map(|_| true),
        };
        inner.check_invariant()?;
        res
    }

    /// Insert or update `row`. Return the previous row, if any.
    pub fn replace(&self, row: Row) -> Result<Option<Row>> {
        self.layout.check_row(&row)?;
        let mut inner = self.lock()?;
        let res = match inner.index.get(row.as_key()) {
            Some(slot) => match inner.read_row(row.as_key(), slot) {
                Ok(old) => inner.update(slot, &row).map(|_| Some(old)),
                Err(err) => Err(err),
            },
            None => inner.append(&row).map(|_| None),
        };
        inner.check_invariant()?;
        res
    }

    /// Append `row` without looking up its key. If key is already present,
    /// both rows are kept until [Table::remove_doubles] is called.
    pub fn add_unique(&self, row: Row) -> Result<()> {
        self.layout.check_row(&row)?;
        let mut inner = self.lock()?;
        let res = inner.append(&row);
        inner.check_invariant()?;
        res
    }

    /// Remove row for `key`, return the removed row.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Row>> {
        let mut inner = self.lock()?;
        let slot = match inner.index.get(key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let row = inner.read_row(key, slot)?;
        inner.index.remove(key);
        inner.remove_slot(slot)?;
        inner.check_invariant()?;
        Ok(Some(row))
    }

    /// Remove row for `key`, return true if row was present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Remove the row in last slot, cheapest possible removal.
    pub fn remove_one(&self) -> Result<Option<Row>> {
        let mut inner = self.lock()?;
        let size = inner.as_records()?.size();
        if size == 0 {
            return Ok(None);
        }

        let last = SlotIndex(size - 1);
        let row = inner.read_slot(last)?;
        if !inner.index.remove_at(row.as_key(), last) {
            err_at!(InvariantViolation, msg: "{:?} {:?} not at {}", inner.loc, row, last)?
        }
        inner.remove_slot(last)?;
        inner.check_invariant()?;
        Ok(Some(row))
    }

    /// Repair duplicate keys. For every key stored in more than one slot,
    /// the row in lowest slot is kept and others are removed. Return the
    /// removed rows, grouped by key.
    pub fn remove_doubles(&self) -> Result<Vec<Vec<Row>>> {
        let mut inner = self.lock()?;
        let report = inner.remove_doubles()?;
        inner.check_invariant()?;
        Ok(report)
    }

    /// Run the duplicate key repair that was deferred while opening.
    pub fn warm_up(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.warm_up()?;
        inner.check_invariant()
    }

    /// Remove all rows.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.as_mut_records()?.clear()?;
        inner.index.clear();
        if let Some(cache) = inner.cache.as_mut() {
            cache.clear()
        }
        inner.epoch += 1;
        inner.check_invariant()
    }

    /// Write buffered records to file.
    pub fn flush(&self) -> Result<()> {
        self.lock()?.as_mut_records()?.flush()
    }

    /// Return upto `n` rows, starting from the last slot downwards.
    pub fn top(&self, n: usize) -> Result<Vec<Row>> {
        let mut inner = self.lock()?;
        let size = inner.as_records()?.size();
        let n = cmp::min(n as u64, size);

        let mut rows = vec![];
        for slot in ((size - n)..size).rev() {
            rows.push(inner.read_slot(SlotIndex(slot))?);
        }
        Ok(rows)
    }

    /// Return upto `n` rows, sampled at even stride across the slots.
    pub fn random(&self, n: usize) -> Result<Vec<Row>> {
        let mut inner = self.lock()?;
        let size = inner.as_records()?.size();
        let n = cmp::min(n as u64, size);
        if n == 0 {
            return Ok(vec![]);
        }

        let stride = size / n;
        let mut rows = vec![];
        for i in 0..n {
            rows.push(inner.read_slot(SlotIndex(i * stride))?);
        }
        Ok(rows)
    }

    pub fn smallest_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.index.smallest_key())
    }

    pub fn largest_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.index.largest_key())
    }

    /// Iterate over keys in ascending or descending order, starting
    /// from `start`, inclusive.
    pub fn keys(&self, ascending: bool, start: Option<&[u8]>) -> Keys {
        Keys::new(Arc::clone(&self.inner), ascending, start)
    }

    /// Iterate over rows in ascending or descending key order, starting
    /// from `start`, inclusive.
    pub fn rows(&self, ascending: bool, start: Option<&[u8]>) -> Rows {
        Rows::new(Arc::clone(&self.inner), ascending, start)
    }

    /// Iterate over rows in slot order. Iteration fails with
    /// `ConcurrentModification` if rows are added or removed meanwhile.
    pub fn iter(&self) -> Result<Iter> {
        let epoch = self.lock()?.epoch;
        Ok(Iter::new(Arc::clone(&self.inner), epoch))
    }
}

impl Table {
    pub fn to_stats(&self) -> Result<Stats> {
        Ok(self.lock()?.to_stats())
    }

    /// Approximate bytes of memory held by this table.
    pub fn footprint(&self) -> Result<usize> {
        Ok(self.lock()?.footprint())
    }

    pub fn uses_tail_cache(&self) -> Result<bool> {
        Ok(self.lock()?.cache.is_some())
    }

    /// Return true if record file, index and tail-cache agree on size.
    pub fn consistency_check(&self) -> Result<bool> {
        Ok(self.lock()?.check_invariant().is_ok())
    }
}

pub(crate) fn lock_inner(inner: &Mutex<Inner>) -> Result<MutexGuard<Inner>> {
    err_at!(Fatal, inner.lock())
}

impl Inner {
    // scan record file and build index and tail-cache, return slots
    // holding malformed keys.
    fn load(&mut self) -> Result<Vec<SlotIndex>> {
        let (key_len, record_size) = (self.layout.key_len, self.layout.to_record_size());
        let n_file = self.as_records()?.size();
        let chunk_size = match self.cache {
            Some(_) => record_size,
            None => key_len,
        };

        let mut quarantine = vec![];
        let reader = ChunkReader::new(&self.loc, record_size, chunk_size, n_file)?;
        for (i, chunk) in reader.enumerate() {
            let (chunk, slot) = (chunk?, SlotIndex(i as u64));
            let key = &chunk[..key_len];
            if self.layout.order.wellformed(key) {
                self.index.put_unique(key, slot);
            } else {
                warn!(target: "table", "{:?} malformed key {:?} at {}", self.loc, key, slot);
                quarantine.push(slot);
            }

            let failed = match self.cache.as_mut() {
                Some(cache) => cache.push(&chunk[key_len..]).is_err(),
                None => false,
            };
            if failed {
                warn!(target: "table", "{:?} tail-cache dropped while loading", self.loc);
                self.cache = None;
            }
        }

        if self.cache.is_some() && self.abandon_cache() {
            info!(target: "table", "{:?} memory short, tail-cache dropped", self.loc);
            self.cache = None;
        }
        Ok(quarantine)
    }

    // slots in quarantine are not indexed, remove them top-down so that
    // pending slots are never moved.
    fn repair_malformed(&mut self, mut quarantine: Vec<SlotIndex>) -> Result<()> {
        if quarantine.is_empty() {
            return Ok(());
        }

        warn!(
            target: "table",
            "{:?} removing {} rows with malformed keys", self.loc, quarantine.len()
        );
        quarantine.sort();
        for slot in quarantine.into_iter().rev() {
            self.remove_slot(slot)?;
        }
        Ok(())
    }

    fn warm_up(&mut self) -> Result<()> {
        for group in self.remove_doubles()?.into_iter() {
            debug!(target: "table", "{:?} discarded {:?}", self.loc, group);
        }
        Ok(())
    }

    fn remove_doubles(&mut self) -> Result<Vec<Vec<Row>>> {
        let groups = self.index.remove_doubles();
        if groups.is_empty() {
            return Ok(vec![]);
        }
        warn!(target: "table", "{:?} has {} duplicate keys", self.loc, groups.len());

        let mut report = vec![];
        let mut discard = BTreeSet::new();
        for (key, slots) in groups.into_iter() {
            let (keep, others) = match slots.split_first() {
                Some((keep, others)) => (*keep, others),
                None => continue,
            };
            self.index.put(&key, keep);

            let mut rows = vec![];
            for slot in others.iter() {
                rows.push(self.read_slot(*slot)?);
                discard.insert(*slot);
            }
            report.push(rows);
        }

        // highest slot first, compaction moves the last row downwards.
        for slot in discard.into_iter().rev() {
            self.remove_slot(slot)?;
        }
        Ok(report)
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Row>> {
        match self.index.get(key) {
            Some(slot) => {
                let row = self.read_row(key, slot)?;
                if row.as_key() != key {
                    err_at!(
                        InvariantViolation,
                        msg: "{:?} {} holds {:?} not {:?}", self.loc, slot, row, key
                    )?
                }
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn read_row(&mut self, key: &[u8], slot: SlotIndex) -> Result<Row> {
        let tail = match self.cache.as_ref() {
            Some(cache) => cache.get(to_usize(slot)?).map(|tail| tail.to_vec()),
            None => None,
        };
        match tail {
            Some(tail) => Ok(Row::new(key.to_vec(), tail)),
            None => self.read_slot(slot),
        }
    }

    fn read_slot(&mut self, slot: SlotIndex) -> Result<Row> {
        let record = self.as_mut_records()?.get(slot)?;
        self.layout.to_row(record)
    }

    fn append(&mut self, row: &Row) -> Result<()> {
        let slot = self.as_mut_records()?.append(&row.to_bytes())?;
        self.index.put_unique(row.as_key(), slot);

        let failed = match self.cache.as_mut() {
            Some(cache) => cache.push(row.as_tail()).is_err(),
            None => false,
        };
        if failed || (self.cache.is_some() && self.abandon_cache()) {
            info!(target: "table", "{:?} tail-cache dropped", self.loc);
            self.cache = None;
        }
        self.epoch += 1;
        Ok(())
    }

    fn update(&mut self, slot: SlotIndex, row: &Row) -> Result<()> {
        self.as_mut_records()?.put(slot, &row.to_bytes())?;

        if self.cache.is_some() && self.abandon_cache() {
            info!(target: "table", "{:?} tail-cache dropped", self.loc);
            self.cache = None;
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.set(to_usize(slot)?, row.as_tail())?;
        }
        Ok(())
    }

    // remove `slot` from record file and tail-cache, caller must have
    // removed the index entry for slot. The last row moves into `slot`.
    fn remove_slot(&mut self, slot: SlotIndex) -> Result<()> {
        let key_len = self.layout.key_len;
        let records = match self.records.as_mut() {
            Some(records) => records,
            None => return err_at!(InvalidInput, msg: "{:?} closed", self.loc),
        };

        let size = records.size();
        if slot.0 >= size {
            err_at!(Fatal, msg: "{:?} remove {} beyond {}", self.loc, slot, size)?
        }

        let last = SlotIndex(size - 1);
        if slot == last {
            records.drop_last()?;
        } else {
            let record = records.truncate_last()?;
            records.put(slot, &record)?;
            if !self.index.relocate(&record[..key_len], last, slot) {
                err_at!(
                    InvariantViolation,
                    msg: "{:?} key {:?} not at {}", self.loc, &record[..key_len], last
                )?
            }
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.swap_remove(to_usize(slot)?)?;
        }

        self.epoch += 1;
        Ok(())
    }

    fn abandon_cache(&self) -> bool {
        self.hints.is_memory_short() || self.hints.available() < self.min_remaining
    }

    fn check_invariant(&self) -> Result<()> {
        let n_records = self.as_records()?.size();
        let n_index = self.index.size() as u64;
        let n_cache = match self.cache.as_ref() {
            Some(cache) => cache.len() as u64,
            None => n_records,
        };
        if n_records != n_index || n_records != n_cache {
            err_at!(
                InvariantViolation,
                msg: "{:?} records:{} index:{} cache:{}", self.loc, n_records, n_index, n_cache
            )
        } else {
            Ok(())
        }
    }

    fn as_records(&self) -> Result<&Records> {
        match self.records.as_ref() {
            Some(records) => Ok(records),
            None => err_at!(InvalidInput, msg: "{:?} closed", self.loc),
        }
    }

    fn as_mut_records(&mut self) -> Result<&mut Records> {
        match self.records.as_mut() {
            Some(records) => Ok(records),
            None => err_at!(InvalidInput, msg: "{:?} closed", self.loc),
        }
    }
}

impl Inner {
    pub(crate) fn to_stats(&self) -> Stats {
        let key_chunk_size = self.layout.key_len + (table::HANDLE_SIZE as usize);
        let (value_chunk_size, value_mem) = match self.cache.as_ref() {
            Some(cache) => (self.layout.tail_len, cache.to_value_mem()),
            None => (0, 0),
        };
        Stats {
            n_count: self.index.size(),
            key_chunk_size,
            key_mem: key_chunk_size * self.index.size(),
            value_chunk_size,
            value_mem,
        }
    }

    pub(crate) fn footprint(&self) -> usize {
        let records = self.records.as_ref().map(|r| r.footprint()).unwrap_or(0);
        let cache = self.cache.as_ref().map(|c| c.footprint()).unwrap_or(0);
        self.index.footprint() + cache + records
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.records.is_none()
    }

    pub(crate) fn to_epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn to_size(&self) -> u64 {
        self.records.as_ref().map(|r| r.size()).unwrap_or(0)
    }

    pub(crate) fn keys_from(
        &self,
        ascending: bool,
        start: Option<&[u8]>,
        inclusive: bool,
        limit: usize,
    ) -> Vec<Vec<u8>> {
        self.index.keys_from(ascending, start, inclusive, limit)
    }

    pub(crate) fn get_row(&mut self, key: &[u8]) -> Result<Option<Row>> {
        self.get(key)
    }

    pub(crate) fn get_slot(&mut self, slot: SlotIndex) -> Result<Row> {
        self.read_slot(slot)
    }
}

fn to_usize(slot: SlotIndex) -> Result<usize> {
    usize::try_from(slot)
}

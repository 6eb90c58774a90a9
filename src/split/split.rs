use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use std::{
    cmp,
    collections::BTreeMap,
    ffi, fs, iter, mem, path,
    sync::{mpsc, Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
    vec,
};

use crate::{
    scans::MergeScan,
    split::{Config, ShardName},
    table::{self, Registry, Table},
    util::{files, thread, Pool},
    Error, MemoryHints, Result, Row, SysMemory,
};

type WarmPool = Pool<Arc<Table>, Result<()>, ()>;

/// Iterator over all rows of a [SplitTable], shard by shard, in slot order.
pub type Iter = iter::Flatten<vec::IntoIter<table::Iter>>;

/// A logical table partitioned across several [Table] shards, refer to
/// [module][crate::split] documentation for details.
pub struct SplitTable {
    config: Config,
    hints: Arc<dyn MemoryHints>,
    registry: Arc<Registry>,

    shards: RwLock<Shards>,
    pool: Mutex<Option<WarmPool>>,
}

#[derive(Default)]
struct Shards {
    map: BTreeMap<ffi::OsString, Shard>,
    current: Option<ffi::OsString>,
}

struct Shard {
    ts: DateTime<Utc>,
    table: Arc<Table>,
}

impl SplitTable {
    /// Open all shards found in `config.dir`, creating the directory if
    /// missing.
    pub fn open(config: Config) -> Result<SplitTable> {
        let hints: Arc<dyn MemoryHints> = Arc::new(SysMemory::default());
        SplitTable::open_with(config, hints, Registry::global())
    }

    /// Same as [SplitTable::open], using the supplied memory `hints` and
    /// `registry` for every shard.
    pub fn open_with(
        config: Config,
        hints: Arc<dyn MemoryHints>,
        registry: Arc<Registry>,
    ) -> Result<SplitTable> {
        config.table.layout.validate()?;
        err_at!(IOError, fs::create_dir_all(&config.dir), "{:?}", config.dir)?;

        let mut val = SplitTable {
            config,
            hints,
            registry,

            shards: RwLock::new(Shards::default()),
            pool: Mutex::new(None),
        };

        let shards = val.open_shards()?;
        let pool = {
            let n = cmp::max(shards.map.len(), num_cpus::get()) + 1;
            let mut pool: WarmPool = Pool::new(&format!("split-{}", val.config.prefix));
            pool.set_pool_size(n).spawn(warm_up_loop)?;
            pool
        };
        warm_up(&pool, &shards)?;

        val.shards = RwLock::new(shards);
        val.pool = Mutex::new(Some(pool));
        Ok(val)
    }

    // open every shard in directory, heaviest shard first, duplicate
    // repair is deferred to the caller.
    fn open_shards(&self) -> Result<Shards> {
        let prefix = self.config.prefix.as_str();
        let mut found = vec![];
        for file_name in files::list_files(&self.config.dir)?.into_iter() {
            let name = ShardName(file_name);
            match name.to_timestamp(prefix) {
                Ok(ts) => {
                    let loc = self.to_location(&name);
                    match table::static_index_need(&loc, &self.config.table.layout) {
                        Ok(need) => found.push((need, name, ts)),
                        Err(err) => {
                            error!(target: "split", "shard {:?} cannot be sized {}", loc, err);
                        }
                    }
                }
                Err(_) => debug!(target: "split", "skip file {}", name),
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));

        let mut shards = Shards::default();
        for (need, name, ts) in found.into_iter() {
            let loc = self.to_location(&name);
            info!(target: "split", "opening shard {:?} index need:{}", loc, need);

            let mut config = self.config.table.clone();
            config.set_warm_up(false);
            let table = match self.open_table(&loc, config) {
                Ok(table) => table,
                Err(err) => {
                    error!(target: "split", "shard {:?} cannot be opened {}", loc, err);
                    continue;
                }
            };

            let newer = match shards.current.as_ref().and_then(|c| shards.map.get(c)) {
                Some(current) => ts > current.ts,
                None => true,
            };
            if newer {
                shards.current = Some(name.0.clone());
            }
            let table = Arc::new(table);
            shards.map.insert(name.0, Shard { ts, table });
        }

        Ok(shards)
    }

    // open a table, if memory is short retry without the tail-cache.
    fn open_table(&self, loc: &ffi::OsStr, mut config: table::Config) -> Result<Table> {
        let (hints, registry) = (Arc::clone(&self.hints), Arc::clone(&self.registry));
        match Table::open_with(loc, config.clone(), hints, registry) {
            Ok(table) => Ok(table),
            Err(Error::OutOfMemory(p, m)) | Err(Error::CacheAllocationFailed(p, m)) => {
                warn!(target: "split", "{:?} {}:{}, retry without tail-cache", loc, p, m);
                config.set_tail_cache(false).set_buffer_size(0);
                let (hints, registry) = (Arc::clone(&self.hints), Arc::clone(&self.registry));
                Table::open_with(loc, config, hints, registry)
            }
            Err(err) => Err(err),
        }
    }

    fn to_location(&self, name: &ShardName) -> ffi::OsString {
        let mut loc = path::PathBuf::from(&self.config.dir);
        loc.push(&name.0);
        loc.into_os_string()
    }

    /// Close all shards, wait for background workers no more than the
    /// configured grace period.
    pub fn close(self) -> Result<()> {
        let pool = err_at!(Fatal, self.pool.lock())?.take();
        if let Some(pool) = pool {
            if !pool.close_timeout(self.config.grace_period) {
                warn!(target: "split", "{} workers abandoned", self.config.prefix);
            }
        }

        let shards = err_at!(Fatal, self.shards.into_inner())?;
        for (_, shard) in shards.map.into_iter() {
            to_table(shard.table)?.close()?;
        }
        Ok(())
    }

    /// Close all shards and remove their files from disk.
    pub fn purge(self) -> Result<()> {
        let dir = self.config.dir.clone();
        let names = self.to_shard_names()?;
        self.close()?;
        for name in names.into_iter() {
            let mut loc = path::PathBuf::from(&dir);
            loc.push(&name.0);
            files::remove_file(loc.as_os_str())?;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<Shards>> {
        err_at!(Fatal, self.shards.read())
    }

    fn write(&self) -> Result<RwLockWriteGuard<Shards>> {
        err_at!(Fatal, self.shards.write())
    }
}

impl SplitTable {
    pub fn to_config(&self) -> Config {
        self.config.clone()
    }

    /// Return names of all shard files, in creation order.
    pub fn to_shard_names(&self) -> Result<Vec<ShardName>> {
        Ok(self.read()?.map.keys().map(|name| ShardName(name.clone())).collect())
    }

    /// Return name of the shard accepting new keys, if any.
    pub fn to_current(&self) -> Result<Option<ShardName>> {
        Ok(self.read()?.current.clone().map(ShardName))
    }

    pub fn size(&self) -> Result<usize> {
        let shards = self.read()?;
        let mut size = 0;
        for shard in shards.map.values() {
            size += shard.table.size()?
        }
        Ok(size)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let shards = self.read()?;
        for shard in shards.map.values() {
            if !shard.table.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        let shards = self.read()?;
        Ok(keeper_of(&shards, key)?.is_some())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        let shards = self.read()?;
        match keeper_of(&shards, key)? {
            Some(table) => table.get(key),
            None => Ok(None),
        }
    }

    /// Insert or update `row`. An existing key is updated in the shard
    /// holding it, a new key goes to the current shard. Return true if
    /// row was inserted.
    pub fn put(&self, row: Row) -> Result<bool> {
        {
            let shards = self.read()?;
            if let Some(table) = keeper_of(&shards, row.as_key())? {
                return table.put(row);
            }
        }

        let mut shards = self.write()?;
        // key might have been added while the lock was released.
        match keeper_of(&shards, row.as_key())? {
            Some(table) => table.put(row),
            None => self.to_current_table(&mut shards)?.put(row),
        }
    }

    /// Same as [SplitTable::put], but return the previous row, if any.
    pub fn replace(&self, row: Row) -> Result<Option<Row>> {
        {
            let shards = self.read()?;
            if let Some(table) = keeper_of(&shards, row.as_key())? {
                return table.replace(row);
            }
        }

        let mut shards = self.write()?;
        match keeper_of(&shards, row.as_key())? {
            Some(table) => table.replace(row),
            None => self.to_current_table(&mut shards)?.replace(row),
        }
    }

    /// Append `row` to the current shard without looking up its key.
    pub fn add_unique(&self, row: Row) -> Result<()> {
        let mut shards = self.write()?;
        self.to_current_table(&mut shards)?.add_unique(row)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<Row>> {
        let shards = self.read()?;
        match keeper_of(&shards, key)? {
            Some(table) => table.remove(key),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Remove one row from the largest shard.
    pub fn remove_one(&self) -> Result<Option<Row>> {
        let shards = self.read()?;
        match largest(&shards)? {
            Some(table) => table.remove_one(),
            None => Ok(None),
        }
    }

    /// Return upto `n` most recent rows from the largest shard.
    pub fn top(&self, n: usize) -> Result<Vec<Row>> {
        let shards = self.read()?;
        match largest(&shards)? {
            Some(table) => table.top(n),
            None => Ok(vec![]),
        }
    }

    /// Return upto `n` sampled rows from the largest shard.
    pub fn random(&self, n: usize) -> Result<Vec<Row>> {
        let shards = self.read()?;
        match largest(&shards)? {
            Some(table) => table.random(n),
            None => Ok(vec![]),
        }
    }

    /// Repair duplicate keys in every shard, refer [Table::remove_doubles].
    pub fn remove_doubles(&self) -> Result<Vec<Vec<Row>>> {
        let shards = self.read()?;
        let mut report = vec![];
        for shard in shards.map.values() {
            report.extend(shard.table.remove_doubles()?);
        }
        Ok(report)
    }

    pub fn smallest_key(&self) -> Result<Option<Vec<u8>>> {
        self.extreme_key(cmp::Ordering::Less)
    }

    pub fn largest_key(&self) -> Result<Option<Vec<u8>>> {
        self.extreme_key(cmp::Ordering::Greater)
    }

    fn extreme_key(&self, want: cmp::Ordering) -> Result<Option<Vec<u8>>> {
        let order = self.config.table.layout.order;
        let shards = self.read()?;

        let mut res: Option<Vec<u8>> = None;
        for shard in shards.map.values() {
            let key = match want {
                cmp::Ordering::Less => shard.table.smallest_key()?,
                _ => shard.table.largest_key()?,
            };
            res = match (res, key) {
                (Some(a), Some(b)) if order.compare(&b, &a) == want => Some(b),
                (Some(a), _) => Some(a),
                (None, key) => key,
            };
        }
        Ok(res)
    }

    /// Iterate over keys of all shards, merged in key order.
    pub fn keys(
        &self,
        ascending: bool,
        start: Option<&[u8]>,
    ) -> Result<MergeScan<Vec<u8>, table::Keys>> {
        let shards = self.read()?;
        let iters = shards
            .map
            .values()
            .map(|shard| shard.table.keys(ascending, start))
            .collect();
        let order = self.config.table.layout.order;
        Ok(MergeScan::new(order, ascending, iters))
    }

    /// Iterate over rows of all shards, merged in key order.
    pub fn rows(
        &self,
        ascending: bool,
        start: Option<&[u8]>,
    ) -> Result<MergeScan<Row, table::Rows>> {
        let shards = self.read()?;
        let iters = shards
            .map
            .values()
            .map(|shard| shard.table.rows(ascending, start))
            .collect();
        let order = self.config.table.layout.order;
        Ok(MergeScan::new(order, ascending, iters))
    }

    /// Iterate over rows of all shards, one shard after another.
    pub fn iter(&self) -> Result<Iter> {
        let shards = self.read()?;
        let mut iters = vec![];
        for shard in shards.map.values() {
            iters.push(shard.table.iter()?)
        }
        Ok(iters.into_iter().flatten())
    }

    pub fn flush(&self) -> Result<()> {
        for shard in self.read()?.map.values() {
            shard.table.flush()?;
        }
        Ok(())
    }

    /// Close and remove every shard, leaving an empty split-table.
    pub fn clear(&self) -> Result<()> {
        let mut shards = self.write()?;
        let old = mem::take(&mut *shards);
        for (name, shard) in old.map.into_iter() {
            debug!(target: "split", "clear shard {:?}", name);
            to_table(shard.table)?.purge()?;
        }

        let prefix = self.config.prefix.as_str();
        for file_name in files::list_files(&self.config.dir)?.into_iter() {
            let name = ShardName(file_name);
            if name.is_shard(prefix) {
                files::remove_file(&self.to_location(&name))?;
            }
        }

        *shards = self.open_shards()?;
        Ok(())
    }

    /// Approximate bytes of memory held by all shards.
    pub fn footprint(&self) -> Result<usize> {
        let mut footprint = 0;
        for shard in self.read()?.map.values() {
            footprint += shard.table.footprint()?;
        }
        Ok(footprint)
    }

    // return current shard, if it is too old or too big, or if there is
    // no current shard, create a new one.
    fn to_current_table(&self, shards: &mut Shards) -> Result<Arc<Table>> {
        let current = shards.current.as_ref().and_then(|name| shards.map.get(name));
        let newest = current.map(|shard| shard.ts);
        if let Some(shard) = current {
            if !self.is_retired(shard)? {
                return Ok(Arc::clone(&shard.table));
            }
        }

        let ts = match newest {
            Some(newest) => cmp::max(Utc::now(), newest + chrono::Duration::milliseconds(1)),
            None => Utc::now(),
        };
        let name = ShardName::from((self.config.prefix.clone(), ts));
        let loc = self.to_location(&name);
        let table = Arc::new(self.open_table(&loc, self.config.table.clone())?);
        info!(target: "split", "new shard {:?}, retiring {:?}", loc, shards.current);

        let shard = Shard {
            ts,
            table: Arc::clone(&table),
        };
        shards.map.insert(name.0.clone(), shard);
        shards.current = Some(name.0);
        Ok(table)
    }

    fn is_retired(&self, shard: &Shard) -> Result<bool> {
        let age = err_at!(FailConvert, chrono::Duration::from_std(self.config.file_age_limit))?;
        let expired = match shard.ts.checked_add_signed(age) {
            Some(deadline) => deadline < Utc::now(),
            None => false,
        };

        let record_size = shard.table.to_layout().to_record_size() as u64;
        let size = (shard.table.size()? as u64).saturating_mul(record_size);
        Ok(expired || size >= self.config.file_size_limit)
    }
}

fn keeper_of(shards: &Shards, key: &[u8]) -> Result<Option<Arc<Table>>> {
    for shard in shards.map.values() {
        if shard.table.has(key)? {
            return Ok(Some(Arc::clone(&shard.table)));
        }
    }
    Ok(None)
}

// shard with most rows, first one wins a tie.
fn largest(shards: &Shards) -> Result<Option<Arc<Table>>> {
    let mut res: Option<(usize, &Arc<Table>)> = None;
    for shard in shards.map.values() {
        let size = shard.table.size()?;
        res = match res {
            Some((max, table)) if max >= size => Some((max, table)),
            _ => Some((size, &shard.table)),
        };
    }
    Ok(res.map(|(_, table)| Arc::clone(table)))
}

fn to_table(table: Arc<Table>) -> Result<Table> {
    match Arc::try_unwrap(table) {
        Ok(table) => Ok(table),
        Err(table) => err_at!(Fatal, msg: "shard {:?} is still shared", table.to_location()),
    }
}

fn warm_up(pool: &WarmPool, shards: &Shards) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    for shard in shards.map.values() {
        pool.request_tx(Arc::clone(&shard.table), tx.clone())?;
    }
    mem::drop(tx);

    let mut res = Ok(());
    for item in rx.iter() {
        if let Err(err) = item {
            error!(target: "split", "warm-up failed {}", err);
            res = Err(err);
        }
    }
    res
}

fn warm_up_loop(rx: thread::Rx<Arc<Table>, Result<()>>) -> impl FnOnce() {
    move || {
        for (table, resp) in rx {
            let res = table.warm_up();
            mem::drop(table);
            if let Some(resp) = resp {
                resp.send(res).ok();
            }
        }
    }
}

#[cfg(test)]
#[path = "split_test.rs"]
mod split_test;

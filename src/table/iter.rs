use std::{
    sync::{Arc, Mutex},
    vec,
};

use crate::{
    table::{
        table::{lock_inner, Inner},
        ITER_BATCH,
    },
    Result, Row, SlotIndex,
};

/// Iterator over rows in slot order.
///
/// The iterator holds a lease on the table's layout. If rows are added or
/// removed after the iterator was created, the next call fails with
/// `ConcurrentModification` and iteration ends.
pub struct Iter {
    inner: Arc<Mutex<Inner>>,
    epoch: u64,
    slot: u64,
    batch: vec::IntoIter<Row>,
    done: bool,
}

impl Iter {
    pub(crate) fn new(inner: Arc<Mutex<Inner>>, epoch: u64) -> Iter {
        Iter {
            inner,
            epoch,
            slot: 0,
            batch: vec![].into_iter(),
            done: false,
        }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        let mut inner = lock_inner(&self.inner)?;
        if inner.is_closed() {
            err_at!(InvalidInput, msg: "table closed while iterating")?
        } else if inner.to_epoch() != self.epoch {
            err_at!(
                ConcurrentModification,
                msg: "epoch {} != {} at {}", inner.to_epoch(), self.epoch, self.slot
            )?
        }

        if let Some(row) = self.batch.next() {
            return Ok(Some(row));
        }

        let size = inner.to_size();
        let till = std::cmp::min(size, self.slot + (ITER_BATCH as u64));
        let mut rows = vec![];
        while self.slot < till {
            rows.push(inner.get_slot(SlotIndex(self.slot))?);
            self.slot += 1;
        }
        self.batch = rows.into_iter();
        Ok(self.batch.next())
    }
}

impl Iterator for Iter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

// walks the index in batches, each batch is fetched under the lock
// starting just past the last key handed out.
struct KeyCursor {
    inner: Arc<Mutex<Inner>>,
    ascending: bool,
    start: Option<Vec<u8>>,
    inclusive: bool,
    batch: vec::IntoIter<Vec<u8>>,
    done: bool,
}

impl KeyCursor {
    fn new(inner: Arc<Mutex<Inner>>, ascending: bool, start: Option<&[u8]>) -> KeyCursor {
        KeyCursor {
            inner,
            ascending,
            start: start.map(|key| key.to_vec()),
            inclusive: true,
            batch: vec![].into_iter(),
            done: false,
        }
    }

    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(key) = self.batch.next() {
            return Ok(Some(key));
        }

        let keys = {
            let inner = lock_inner(&self.inner)?;
            if inner.is_closed() {
                err_at!(InvalidInput, msg: "table closed while iterating")?
            }
            let start = self.start.as_deref();
            inner.keys_from(self.ascending, start, self.inclusive, ITER_BATCH)
        };
        if let Some(key) = keys.last() {
            self.start = Some(key.clone());
            self.inclusive = false;
        }
        self.batch = keys.into_iter();
        Ok(self.batch.next())
    }
}

/// Iterator over keys in sort order, refer [Table::keys][crate::table::Table::keys].
pub struct Keys {
    cursor: KeyCursor,
}

impl Keys {
    pub(crate) fn new(inner: Arc<Mutex<Inner>>, asc: bool, start: Option<&[u8]>) -> Keys {
        Keys {
            cursor: KeyCursor::new(inner, asc, start),
        }
    }
}

impl Iterator for Keys {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.done {
            return None;
        }
        match self.cursor.next_key() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.cursor.done = true;
                None
            }
            Err(err) => {
                self.cursor.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Iterator over rows in key order, refer [Table::rows][crate::table::Table::rows].
///
/// Keys are fetched in batches, and each row is resolved when it is
/// visited. If a key vanishes in between, iteration fails with
/// `ConcurrentModification`.
pub struct Rows {
    cursor: KeyCursor,
}

impl Rows {
    pub(crate) fn new(inner: Arc<Mutex<Inner>>, asc: bool, start: Option<&[u8]>) -> Rows {
        Rows {
            cursor: KeyCursor::new(inner, asc, start),
        }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        let key = match self.cursor.next_key()? {
            Some(key) => key,
            None => return Ok(None),
        };
        match lock_inner(&self.cursor.inner)?.get_row(&key)? {
            Some(row) => Ok(Some(row)),
            None => err_at!(ConcurrentModification, msg: "key {:?} removed", key),
        }
    }
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.cursor.done = true;
                None
            }
            Err(err) => {
                self.cursor.done = true;
                Some(Err(err))
            }
        }
    }
}

//! Module `row` define the shape of a table row.

use serde::{Deserialize, Serialize};

use std::{convert::TryFrom, fmt, result};

use crate::{KeyOrder, Result};

/// Location of a row inside a record file, counted in records and not
/// in bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct SlotIndex(pub u64);

impl SlotIndex {
    /// Byte offset of this slot in a file of `record_size` records.
    pub fn to_fpos(&self, record_size: usize) -> u64 {
        self.0 * (record_size as u64)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "slot-{}", self.0)
    }
}

impl From<u64> for SlotIndex {
    fn from(val: u64) -> SlotIndex {
        SlotIndex(val)
    }
}

impl From<SlotIndex> for u64 {
    fn from(val: SlotIndex) -> u64 {
        val.0
    }
}

impl TryFrom<SlotIndex> for usize {
    type Error = crate::Error;

    fn try_from(val: SlotIndex) -> Result<usize> {
        err_at!(FailConvert, usize::try_from(val.0))
    }
}

/// Schema shared by all rows of a table. Every row is exactly
/// `key_len + tail_len` bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RowLayout {
    /// Number of bytes in the primary key.
    pub key_len: usize,
    /// Number of bytes in the tail, that follow the key.
    pub tail_len: usize,
    /// Order in which keys are sorted.
    pub order: KeyOrder,
}

impl<'a> arbitrary::Arbitrary<'a> for RowLayout {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let key_len = *u.choose(&[4, 8, 12])?;
        let tail_len = *u.choose(&[0, 1, 4, 16, 100])?;
        let order: KeyOrder = u.arbitrary()?;
        Ok(RowLayout::new(key_len, tail_len, order))
    }
}

impl RowLayout {
    pub fn new(key_len: usize, tail_len: usize, order: KeyOrder) -> RowLayout {
        RowLayout {
            key_len,
            tail_len,
            order,
        }
    }

    /// Size of a row, in bytes, as stored in record file.
    #[inline]
    pub fn to_record_size(&self) -> usize {
        self.key_len + self.tail_len
    }

    /// Validate the layout itself.
    pub fn validate(&self) -> Result<()> {
        if self.key_len == 0 {
            err_at!(InvalidInput, msg: "key length must be non-zero")
        } else {
            Ok(())
        }
    }

    /// Check that `key` fits this layout and is well-formed.
    pub fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len {
            err_at!(InvalidInput, msg: "key len {} != {}", key.len(), self.key_len)
        } else if !self.order.wellformed(key) {
            err_at!(MalformedKey, msg: "key {:?} for order {}", key, self.order)
        } else {
            Ok(())
        }
    }

    /// Check that `row` fits this layout and its key is well-formed.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.tail.len() != self.tail_len {
            err_at!(
                InvalidInput, msg: "tail len {} != {}", row.tail.len(), self.tail_len
            )
        } else {
            self.check_key(&row.key)
        }
    }

    /// Split a record, as read from file, into a row.
    pub fn to_row(&self, mut record: Vec<u8>) -> Result<Row> {
        if record.len() != self.to_record_size() {
            err_at!(
                Fatal, msg: "record len {} != {}", record.len(), self.to_record_size()
            )
        } else {
            let tail = record.split_off(self.key_len);
            Ok(Row { key: record, tail })
        }
    }
}

/// A single row, primary key followed by the tail.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Row {
    key: Vec<u8>,
    tail: Vec<u8>,
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match std::str::from_utf8(&self.key) {
            Ok(key) => write!(f, "Row<{:?},{:?}>", key, self.tail),
            Err(_) => write!(f, "Row<{:?},{:?}>", self.key, self.tail),
        }
    }
}

impl Row {
    pub fn new(key: Vec<u8>, tail: Vec<u8>) -> Row {
        Row { key, tail }
    }

    /// Compose a row from the key and a tail held elsewhere.
    pub fn from_parts(key: &[u8], tail: &[u8]) -> Row {
        Row {
            key: key.to_vec(),
            tail: tail.to_vec(),
        }
    }

    #[inline]
    pub fn as_key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub fn as_tail(&self) -> &[u8] {
        &self.tail
    }

    /// Serialize row as a record, key followed by tail.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(self.key.len() + self.tail.len());
        record.extend_from_slice(&self.key);
        record.extend_from_slice(&self.tail);
        record
    }

    pub fn unwrap(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.tail)
    }
}

#[cfg(test)]
#[path = "row_test.rs"]
mod row_test;

//! Module `scans` implement iterator types that are useful for composing
//! scans across several tables.
//!
//! * [MergeScan], k-way merge of key-ordered iterators into a single
//!   key-ordered iterator. Used by [SplitTable][crate::split::SplitTable]
//!   to iterate over all its shards.

use std::cmp;

use crate::{KeyOrder, Result, Row};

/// Items that can be merged by [MergeScan].
pub trait Keyed {
    fn as_key(&self) -> &[u8];
}

impl Keyed for Row {
    fn as_key(&self) -> &[u8] {
        Row::as_key(self)
    }
}

impl Keyed for Vec<u8> {
    fn as_key(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Merge several iterators, each sorted by key in the same direction,
/// into one sorted iterator.
///
/// Only one pending item per iterator is held at any time. When more than
/// one iterator yield an equal key, the item from the earliest iterator is
/// returned and the others are skipped. An error from any iterator is
/// returned as is and ends the scan.
pub struct MergeScan<T, I>
where
    I: Iterator<Item = Result<T>>,
{
    order: KeyOrder,
    ascending: bool,
    iters: Vec<I>,
    heads: Vec<Option<T>>,
    started: bool,
    done: bool,
}

impl<T, I> MergeScan<T, I>
where
    T: Keyed,
    I: Iterator<Item = Result<T>>,
{
    pub fn new(order: KeyOrder, ascending: bool, iters: Vec<I>) -> MergeScan<T, I> {
        let heads = iters.iter().map(|_| None).collect();
        MergeScan {
            order,
            ascending,
            iters,
            heads,
            started: false,
            done: false,
        }
    }

    fn fill(&mut self, off: usize) -> Result<()> {
        self.heads[off] = match self.iters[off].next() {
            Some(item) => Some(item?),
            None => None,
        };
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<T>> {
        if !self.started {
            self.started = true;
            for off in 0..self.iters.len() {
                self.fill(off)?;
            }
        }

        let mut pick: Option<usize> = None;
        for (off, head) in self.heads.iter().enumerate() {
            let key = match head {
                Some(item) => item.as_key(),
                None => continue,
            };
            pick = match pick.and_then(|p| self.heads[p].as_ref().map(|h| (p, h))) {
                Some((p, picked)) => match self.order.compare(key, picked.as_key()) {
                    cmp::Ordering::Less if self.ascending => Some(off),
                    cmp::Ordering::Greater if !self.ascending => Some(off),
                    _ => Some(p),
                },
                None => Some(off),
            };
        }

        let pick = match pick {
            Some(pick) => pick,
            None => return Ok(None),
        };
        let item = self.heads[pick].take();
        self.fill(pick)?;

        if let Some(item) = item.as_ref() {
            for off in 0..self.heads.len() {
                loop {
                    let equal = match self.heads[off].as_ref() {
                        Some(head) => self.order.compare(head.as_key(), item.as_key()),
                        None => break,
                    };
                    if equal != cmp::Ordering::Equal {
                        break;
                    }
                    self.fill(off)?;
                }
            }
        }
        Ok(item)
    }
}

impl<T, I> Iterator for MergeScan<T, I>
where
    T: Keyed,
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
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

#[cfg(test)]
#[path = "scans_test.rs"]
mod scans_test;

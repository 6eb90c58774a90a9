//! Module `index` implement the in-memory primary key index of a table.
//!
//! [PrimaryIndex] maps fixed length keys to the slot holding the row. Keys
//! are sorted by the table's [KeyOrder]. The index is normally unique, but
//! rows loaded by bulk insert may share a key with an older row, typically
//! after an unclean shutdown. Such duplicates are parked aside, counted in
//! [PrimaryIndex::size] so that index and record file agree, and handed
//! back by [PrimaryIndex::remove_doubles] for repair.

use std::{cmp, collections::BTreeMap, mem, ops::Bound};

use crate::{KeyOrder, SlotIndex};

/// Key type used by [PrimaryIndex], sorted by its [KeyOrder].
#[derive(Clone, Debug)]
pub struct IndexKey {
    order: KeyOrder,
    bytes: Box<[u8]>,
}

impl IndexKey {
    pub fn new(order: KeyOrder, key: &[u8]) -> IndexKey {
        IndexKey {
            order,
            bytes: key.to_vec().into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &IndexKey) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &IndexKey) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &IndexKey) -> cmp::Ordering {
        self.order.compare(&self.bytes, &other.bytes)
    }
}

/// Ordered map of primary keys to slots.
pub struct PrimaryIndex {
    order: KeyOrder,
    key_len: usize,
    map: BTreeMap<IndexKey, SlotIndex>,
    // slots, other than the one in `map`, sharing the same key.
    doubles: BTreeMap<IndexKey, Vec<SlotIndex>>,
    n_doubles: usize,
}

impl PrimaryIndex {
    pub fn new(order: KeyOrder, key_len: usize) -> PrimaryIndex {
        PrimaryIndex {
            order,
            key_len,
            map: BTreeMap::new(),
            doubles: BTreeMap::new(),
            n_doubles: 0,
        }
    }

    /// Number of indexed slots, including the duplicates.
    pub fn size(&self) -> usize {
        self.map.len() + self.n_doubles
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn to_order(&self) -> KeyOrder {
        self.order
    }

    /// Approximate bytes of memory held by this index.
    pub fn footprint(&self) -> usize {
        let entry = self.key_len + mem::size_of::<IndexKey>() + mem::size_of::<SlotIndex>();
        (self.map.len() + self.n_doubles) * (entry + ENTRY_OVERHEAD)
    }

    /// Index `key` at `slot`, return the slot previously indexed for key.
    pub fn put(&mut self, key: &[u8], slot: SlotIndex) -> Option<SlotIndex> {
        let key = self.to_key(key);
        self.map.insert(key, slot)
    }

    /// Index `key` at `slot` without replacing an existing entry. If key
    /// is already indexed, slot is remembered as a duplicate.
    pub fn put_unique(&mut self, key: &[u8], slot: SlotIndex) {
        let key = self.to_key(key);
        if self.map.contains_key(&key) {
            self.doubles.entry(key).or_insert_with(Vec::new).push(slot);
            self.n_doubles += 1;
        } else {
            self.map.insert(key, slot);
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<SlotIndex> {
        self.map.get(&self.to_key(key)).copied()
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.map.contains_key(&self.to_key(key))
    }

    /// Remove `key` from index, return its slot. If the key has
    /// duplicates, one of them takes its place.
    pub fn remove(&mut self, key: &[u8]) -> Option<SlotIndex> {
        let key = self.to_key(key);
        let slot = self.map.remove(&key)?;

        let (promote, empty) = match self.doubles.get_mut(&key) {
            Some(slots) => (slots.pop(), slots.is_empty()),
            None => (None, false),
        };
        if empty {
            self.doubles.remove(&key);
        }
        if let Some(promote) = promote {
            self.n_doubles -= 1;
            self.map.insert(key, promote);
        }

        Some(slot)
    }

    /// Remove the entry for `key` at exactly `slot`, be it the primary
    /// entry or a duplicate. Return false if key is not indexed at slot.
    pub fn remove_at(&mut self, key: &[u8], slot: SlotIndex) -> bool {
        match self.get(key) {
            Some(s) if s == slot => return self.remove(key).is_some(),
            Some(_) => (),
            None => return false,
        }

        let key = self.to_key(key);
        let (found, empty) = match self.doubles.get_mut(&key) {
            Some(slots) => match slots.iter().position(|s| *s == slot) {
                Some(off) => {
                    slots.swap_remove(off);
                    (true, slots.is_empty())
                }
                None => (false, false),
            },
            None => (false, false),
        };
        if empty {
            self.doubles.remove(&key);
        }
        if found {
            self.n_doubles -= 1;
        }
        found
    }

    /// Move the entry for `key` from slot `from` to slot `to`. Return
    /// false if key is not indexed at `from`.
    pub fn relocate(&mut self, key: &[u8], from: SlotIndex, to: SlotIndex) -> bool {
        let key = self.to_key(key);
        match self.map.get_mut(&key) {
            Some(slot) if *slot == from => {
                *slot = to;
                return true;
            }
            Some(_) => (),
            None => return false,
        }

        match self.doubles.get_mut(&key) {
            Some(slots) => match slots.iter_mut().find(|slot| **slot == from) {
                Some(slot) => {
                    *slot = to;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Return true if some key is indexed at more than one slot.
    pub fn has_doubles(&self) -> bool {
        self.n_doubles > 0
    }

    /// Remove every key that is indexed at more than one slot, and return
    /// them along with all their slots, in ascending slot order.
    pub fn remove_doubles(&mut self) -> Vec<(Vec<u8>, Vec<SlotIndex>)> {
        let doubles = mem::take(&mut self.doubles);
        self.n_doubles = 0;

        let mut groups = vec![];
        for (key, mut slots) in doubles.into_iter() {
            if let Some(slot) = self.map.remove(&key) {
                slots.push(slot);
            }
            slots.sort();
            groups.push((key.as_bytes().to_vec(), slots));
        }
        groups
    }

    /// Return upto `limit` keys in ascending or descending order,
    /// starting from `start`. `start` is included only if `inclusive`.
    pub fn keys_from(
        &self,
        ascending: bool,
        start: Option<&[u8]>,
        inclusive: bool,
        limit: usize,
    ) -> Vec<Vec<u8>> {
        let bound = match start {
            Some(key) if inclusive => Bound::Included(self.to_key(key)),
            Some(key) => Bound::Excluded(self.to_key(key)),
            None => Bound::Unbounded,
        };

        if ascending {
            let range = self.map.range((bound, Bound::Unbounded));
            range.take(limit).map(|(key, _)| key.as_bytes().to_vec()).collect()
        } else {
            let range = self.map.range((Bound::Unbounded, bound));
            let range = range.rev().take(limit);
            range.map(|(key, _)| key.as_bytes().to_vec()).collect()
        }
    }

    pub fn smallest_key(&self) -> Option<Vec<u8>> {
        self.map.keys().next().map(|key| key.as_bytes().to_vec())
    }

    pub fn largest_key(&self) -> Option<Vec<u8>> {
        self.map.keys().next_back().map(|key| key.as_bytes().to_vec())
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.doubles.clear();
        self.n_doubles = 0;
    }

    fn to_key(&self, key: &[u8]) -> IndexKey {
        IndexKey::new(self.order, key)
    }
}

/// Approximate memory overhead of a single map entry, excluding its key.
pub const ENTRY_OVERHEAD: usize = 16;

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;

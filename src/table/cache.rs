use crate::Result;

/// In-memory copy of row tails, index aligned with slots of the record
/// file. Entry `i` holds the tail of the row in slot `i`.
///
/// Growing the cache never aborts the process on allocation failure, it
/// fails with `CacheAllocationFailed` instead, and the owner is expected
/// to drop the cache.
pub struct TailCache {
    tail_len: usize,
    n: usize,
    data: Vec<u8>,
}

impl TailCache {
    /// Create a cache with room for `capacity` tails.
    pub fn new(tail_len: usize, capacity: usize) -> Result<TailCache> {
        let mut data = vec![];
        let additional = capacity.saturating_mul(tail_len);
        err_at!(CacheAllocationFailed, data.try_reserve(additional), "{}", additional)?;
        Ok(TailCache {
            tail_len,
            n: 0,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Approximate bytes of memory held by this cache.
    pub fn footprint(&self) -> usize {
        self.data.capacity()
    }

    /// Bytes held by the cached tails.
    pub fn to_value_mem(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, tail: &[u8]) -> Result<()> {
        self.check_tail(tail)?;
        err_at!(CacheAllocationFailed, self.data.try_reserve(self.tail_len))?;
        self.data.extend_from_slice(tail);
        self.n += 1;
        Ok(())
    }

    pub fn get(&self, i: usize) -> Option<&[u8]> {
        if i < self.n {
            let off = i * self.tail_len;
            Some(&self.data[off..off + self.tail_len])
        } else {
            None
        }
    }

    pub fn set(&mut self, i: usize, tail: &[u8]) -> Result<()> {
        self.check_tail(tail)?;
        if i < self.n {
            let off = i * self.tail_len;
            self.data[off..off + self.tail_len].copy_from_slice(tail);
            Ok(())
        } else {
            err_at!(Fatal, msg: "tail-cache set {} beyond {}", i, self.n)
        }
    }

    /// Remove the tail at `i`, the last tail takes its place.
    pub fn swap_remove(&mut self, i: usize) -> Result<()> {
        if i >= self.n {
            err_at!(Fatal, msg: "tail-cache remove {} beyond {}", i, self.n)?
        }

        let last = (self.n - 1) * self.tail_len;
        if i < self.n - 1 {
            let off = i * self.tail_len;
            self.data.copy_within(last..last + self.tail_len, off);
        }
        self.data.truncate(last);
        self.n -= 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.n = 0;
    }

    fn check_tail(&self, tail: &[u8]) -> Result<()> {
        if tail.len() != self.tail_len {
            err_at!(Fatal, msg: "tail len {} != {}", tail.len(), self.tail_len)
        } else {
            Ok(())
        }
    }
}

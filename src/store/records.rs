use log::debug;

use std::{convert::TryFrom, ffi, fs};

use crate::{read_file, util::files, write_file, Result, SlotIndex};

/// Random access handle on a record file.
///
/// Appended records are first collected in a write buffer and written
/// to file in a single write once the buffer fills up, on `flush()` and
/// on `close()`. Every other operation transparently address both the
/// on-disk and the buffered slots. The file is held under an exclusive
/// lock for the life time of this value.
pub struct Records {
    loc: ffi::OsString,
    fd: fs::File,
    record_size: usize,
    // number of records in file, excluding the buffered ones.
    n_file: u64,
    buffer: Vec<u8>,
    buffer_size: usize,
}

impl Drop for Records {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            debug!(target: "records", "{:?} flush on drop {}", self.loc, err);
        }
    }
}

impl Records {
    /// Open record file at `loc`, creating an empty one if missing. File
    /// length must be a multiple of `record_size`.
    pub fn open(loc: &ffi::OsStr, record_size: usize, buffer_size: usize) -> Result<Records> {
        if record_size == 0 {
            err_at!(InvalidInput, msg: "zero record size for {:?}", loc)?
        }

        let fd = files::open_file_rw(loc, true)?;
        files::lock_file(&fd, loc)?;

        let len = err_at!(IOError, fd.metadata(), "metadata {:?}", loc)?.len();
        let rs = record_size as u64;
        if len % rs != 0 {
            files::unlock_file(&fd, loc).ok();
            err_at!(CorruptSize, msg: "{:?} len {} record size {}", loc, len, rs)?
        }

        let buffer_size = std::cmp::max(buffer_size, 1);
        Ok(Records {
            loc: loc.to_os_string(),
            fd,
            record_size,
            n_file: len / rs,
            buffer: Vec::with_capacity(buffer_size * record_size),
            buffer_size,
        })
    }

    /// Number of records, including the buffered ones.
    pub fn size(&self) -> u64 {
        self.n_file + self.n_buffered()
    }

    pub fn to_record_size(&self) -> usize {
        self.record_size
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    /// Approximate bytes of memory held by the write buffer.
    pub fn footprint(&self) -> usize {
        self.buffer.capacity()
    }

    /// Read record at `slot`.
    pub fn get(&mut self, slot: SlotIndex) -> Result<Vec<u8>> {
        match self.to_buffer_off(slot)? {
            Some(off) => Ok(self.buffer[off..off + self.record_size].to_vec()),
            None => {
                let fpos = slot.to_fpos(self.record_size);
                read_file!(self.fd, fpos, self.record_size, "get record")
            }
        }
    }

    /// Overwrite record at `slot`, slot must already exist.
    pub fn put(&mut self, slot: SlotIndex, record: &[u8]) -> Result<()> {
        self.check_record(record)?;
        match self.to_buffer_off(slot)? {
            Some(off) => {
                self.buffer[off..off + self.record_size].copy_from_slice(record);
            }
            None => {
                let fpos = slot.to_fpos(self.record_size);
                write_file!(self.fd, fpos, record, "put record")?;
            }
        }
        Ok(())
    }

    /// Append a new record at the end, return its slot.
    pub fn append(&mut self, record: &[u8]) -> Result<SlotIndex> {
        self.check_record(record)?;
        let slot = SlotIndex(self.size());
        self.buffer.extend_from_slice(record);
        if self.n_buffered() >= (self.buffer_size as u64) {
            self.flush()?;
        }
        Ok(slot)
    }

    /// Remove the last record and return its bytes.
    pub fn truncate_last(&mut self) -> Result<Vec<u8>> {
        if !self.buffer.is_empty() {
            let off = self.buffer.len() - self.record_size;
            Ok(self.buffer.split_off(off))
        } else if self.n_file > 0 {
            let last = SlotIndex(self.n_file - 1);
            let record = self.get(last)?;
            self.set_file_len(self.n_file - 1)?;
            Ok(record)
        } else {
            err_at!(Fatal, msg: "truncate_last on empty {:?}", self.loc)
        }
    }

    /// Remove the last record, without reading it.
    pub fn drop_last(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let off = self.buffer.len() - self.record_size;
            self.buffer.truncate(off);
            Ok(())
        } else if self.n_file > 0 {
            self.set_file_len(self.n_file - 1)
        } else {
            err_at!(Fatal, msg: "drop_last on empty {:?}", self.loc)
        }
    }

    /// Write buffered records to file.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let fpos = SlotIndex(self.n_file).to_fpos(self.record_size);
        write_file!(self.fd, fpos, &self.buffer, "flush records")?;
        self.n_file += self.n_buffered();
        self.buffer.clear();
        Ok(())
    }

    /// Remove all records, file is truncated to zero length.
    pub fn clear(&mut self) -> Result<()> {
        self.buffer.clear();
        self.set_file_len(0)
    }

    /// Flush, sync and unlock the record file.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        err_at!(IOError, self.fd.sync_all(), "sync {:?}", self.loc)?;
        files::unlock_file(&self.fd, &self.loc)
    }

    fn n_buffered(&self) -> u64 {
        (self.buffer.len() / self.record_size) as u64
    }

    // offset into write buffer, None if slot is on disk.
    fn to_buffer_off(&self, slot: SlotIndex) -> Result<Option<usize>> {
        if slot.0 < self.n_file {
            Ok(None)
        } else if slot.0 < self.size() {
            let n = err_at!(FailConvert, usize::try_from(slot.0 - self.n_file))?;
            Ok(Some(n * self.record_size))
        } else {
            err_at!(InvalidInput, msg: "{} beyond {} in {:?}", slot, self.size(), self.loc)
        }
    }

    fn check_record(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            err_at!(
                InvalidInput, msg: "record len {} != {}", record.len(), self.record_size
            )
        } else {
            Ok(())
        }
    }

    fn set_file_len(&mut self, n_records: u64) -> Result<()> {
        let len = SlotIndex(n_records).to_fpos(self.record_size);
        err_at!(IOError, self.fd.set_len(len), "truncate {:?} to {}", self.loc, len)?;
        self.n_file = n_records;
        Ok(())
    }
}

#[cfg(test)]
#[path = "records_test.rs"]
mod records_test;

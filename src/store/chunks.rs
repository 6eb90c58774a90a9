use std::{
    ffi, fs,
    io::{self, Read},
};

use crate::{store::SCAN_BUFFER, util::files, Result};

/// Sequential reader over a record file, yielding the first `chunk_size`
/// bytes of every record in file order.
///
/// The reader never seeks backwards, the unused part of each record is
/// skipped within the read buffer. It is single pass, once the last
/// record is read, or a read fails, the iteration ends.
pub struct ChunkReader {
    loc: ffi::OsString,
    reader: io::BufReader<fs::File>,
    record_size: usize,
    chunk_size: usize,
    remaining: u64,
}

impl ChunkReader {
    /// Read the leading `chunk_size` bytes of the first `n_records`
    /// records in file `loc`.
    pub fn new(
        loc: &ffi::OsStr,
        record_size: usize,
        chunk_size: usize,
        n_records: u64,
    ) -> Result<ChunkReader> {
        if chunk_size == 0 || chunk_size > record_size {
            err_at!(InvalidInput, msg: "chunk {} record {}", chunk_size, record_size)?
        }

        let fd = files::open_file_r(loc)?;
        Ok(ChunkReader {
            loc: loc.to_os_string(),
            reader: io::BufReader::with_capacity(SCAN_BUFFER, fd),
            record_size,
            chunk_size,
            remaining: n_records,
        })
    }

    fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0; self.chunk_size];
        err_at!(
            IOError,
            self.reader.read_exact(&mut chunk),
            "scan {:?}, {} records left",
            self.loc,
            self.remaining
        )?;

        let skip = (self.record_size - self.chunk_size) as i64;
        if skip > 0 && self.remaining > 1 {
            err_at!(IOError, self.reader.seek_relative(skip), "skip {:?}", self.loc)?;
        }
        Ok(chunk)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        match self.read_chunk() {
            Ok(chunk) => {
                self.remaining -= 1;
                Some(Ok(chunk))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
#[path = "chunks_test.rs"]
mod chunks_test;

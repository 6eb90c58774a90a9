//! Module implement common utility functions and types.

pub mod files;
pub mod thread;

pub use thread::{Pool, Thread};

/// Read `$n` bytes from file at offset `$fpos`, fail if file is shorter.
#[macro_export]
macro_rules! read_file {
    ($fd:expr, $fpos:expr, $n:expr, $msg:expr) => {{
        use std::io::{Read, Seek, SeekFrom};

        match $fd.seek(SeekFrom::Start($fpos)) {
            Ok(_) => {
                let mut buf = vec![0; $n];
                match $fd.read_exact(&mut buf) {
                    Ok(()) => Ok(buf),
                    Err(err) => {
                        err_at!(IOError, Err(err), concat!($msg, " {} at {}"), $n, $fpos)
                    }
                }
            }
            Err(err) => err_at!(IOError, Err(err)),
        }
    }};
}

/// Write all of `$buffer` into file at offset `$fpos`.
#[macro_export]
macro_rules! write_file {
    ($fd:expr, $fpos:expr, $buffer:expr, $msg:expr) => {{
        use std::io::{Seek, SeekFrom, Write};

        match $fd.seek(SeekFrom::Start($fpos)) {
            Ok(_) => match $fd.write_all($buffer) {
                Ok(()) => Ok($buffer.len()),
                Err(err) => err_at!(
                    IOError,
                    Err(err),
                    concat!($msg, " {} at {}"),
                    $buffer.len(),
                    $fpos
                ),
            },
            Err(err) => err_at!(IOError, Err(err)),
        }
    }};
}

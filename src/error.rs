use std::{error, fmt, result};

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location, and a message.
#[derive(Clone, PartialEq)]
pub enum Error {
    /// Unrecoverable condition, typically a bug.
    Fatal(String, String),
    /// Failure reading, writing, syncing or truncating a file.
    IOError(String, String),
    /// Caller supplied argument does not match the table's layout.
    InvalidInput(String, String),
    /// File, or file-name, is not what it is expected to be.
    InvalidFile(String, String),
    /// Numeric conversion failed.
    FailConvert(String, String),
    /// File length is not a multiple of record size, and truncating it
    /// to the nearest whole record failed.
    CorruptSize(String, String),
    /// Key is not well-formed for the table's key order.
    MalformedKey(String, String),
    /// Not enough memory for the primary index.
    OutOfMemory(String, String),
    /// Not enough memory for the tail-cache.
    CacheAllocationFailed(String, String),
    /// Table was modified while being iterated upon.
    ConcurrentModification(String, String),
    /// Record file, primary index and tail-cache disagree on size.
    InvariantViolation(String, String),
    /// Inter-thread communication failed.
    IPCFail(String, String),
    /// Thread panicked or could not be joined.
    ThreadFail(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            InvalidFile(p, msg) => write!(f, "{} InvalidFile: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            CorruptSize(p, msg) => write!(f, "{} CorruptSize: {}", p, msg),
            MalformedKey(p, msg) => write!(f, "{} MalformedKey: {}", p, msg),
            OutOfMemory(p, msg) => write!(f, "{} OutOfMemory: {}", p, msg),
            CacheAllocationFailed(p, msg) => {
                write!(f, "{} CacheAllocationFailed: {}", p, msg)
            }
            ConcurrentModification(p, msg) => {
                write!(f, "{} ConcurrentModification: {}", p, msg)
            }
            InvariantViolation(p, msg) => {
                write!(f, "{} InvariantViolation: {}", p, msg)
            }
            IPCFail(p, msg) => write!(f, "{} IPCFail: {}", p, msg),
            ThreadFail(p, msg) => write!(f, "{} ThreadFail: {}", p, msg),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

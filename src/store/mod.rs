//! Module implement the flat record files backing a table.
//!
//! A record file is a sequence of fixed-size slots, slot `i` is found at
//! byte offset `i * record_size`. There is no header, no per-record
//! metadata and no checksum. [Records] is the random-access handle used by
//! a live table, while [ChunkReader] scans the same file sequentially and
//! is used only when rebuilding the in-memory index.

mod chunks;
mod records;

pub use chunks::ChunkReader;
pub use records::Records;

/// Default number of records buffered in memory before appending them
/// to the file.
pub const BUFFER_SIZE: usize = 20;

/// Size of the read buffer used while scanning a record file.
pub const SCAN_BUFFER: usize = 64 * 1024;

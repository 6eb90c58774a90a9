//! Package `rowstore` implement a fixed-record key,value table engine.
//!
//! Rows are fixed width, a binary primary key followed by a binary tail.
//! Rows are stored in flat files, one slot per row, while the primary key
//! index, and optionally a full copy of the tails, is kept in memory to
//! avoid disk access on hot paths.
//!
//! **Table**
//!
//! A [table::Table] owns exactly one record file, one in-memory primary
//! index and an optional tail-cache. Slots in the record file are always
//! densely packed, that is, there are no tombstones and no gaps. Removing a
//! row moves the last row into the freed slot and truncates the file by one
//! record, hence deletes are O(1).
//!
//! Opening a table shall rebuild its index by scanning the record file
//! sequentially. Rows with malformed keys, and duplicate rows left behind
//! by an unclean shutdown, are detected and repaired while opening.
//!
//! **SplitTable**
//!
//! A [split::SplitTable] partitions one logical table across many tables,
//! called shards. Each shard file name carry its creation time, new keys
//! always go to the current shard which is retired once it gets too old or
//! too big. Ordered iteration over a split-table is a k-way merge of its
//! shards.
//!
//! ```ignore
//! use rowstore::{table, KeyOrder, Row, RowLayout};
//!
//! let layout = RowLayout::new(4, 4, KeyOrder::Natural);
//! let config = table::Config::new(layout);
//! let table = table::Table::open("/opt/data/words.table".as_ref(), config)?;
//!
//! table.put(Row::new(b"aaaa".to_vec(), b"1111".to_vec()))?;
//! assert_eq!(table.get(b"aaaa")?.unwrap().as_tail(), b"1111");
//! table.close()?;
//! ```

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, msg: "bad argument {}", arg);
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, std::io::read(buf));
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, std::fs::read(file_path), "read failed {:?}", file_path);
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod error;
mod mem;
mod order;
mod row;

pub mod index;
pub mod scans;
pub mod split;
pub mod store;
pub mod table;
pub mod util;

pub use crate::error::Error;
pub use crate::mem::{FixedMemory, MemoryHints, SysMemory};
pub use crate::order::KeyOrder;
pub use crate::row::{Row, RowLayout, SlotIndex};

/// Type alias for Result return type, used by this package.
pub type Result<T> = std::result::Result<T, Error>;

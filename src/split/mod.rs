//! Module implement [SplitTable], a logical table partitioned across
//! several [Table][crate::table::Table] shards.
//!
//! All shards live in a single directory and share a prefix. Shard files
//! are named as `{prefix}.{yyyyMMddHHmmssSSS}.table`, where the timestamp,
//! in UTC, is the shard's creation time. The newest shard is the current
//! shard, new keys go to the current shard, while updates go to whichever
//! shard already holds the key.
//!
//! Current shard is retired, and a new one created, once it is older than
//! `file_age_limit` or bigger than `file_size_limit`.

mod config;
mod files;
mod split;

pub use config::Config;
pub use files::ShardName;
pub use split::{Iter, SplitTable};

/// Default age limit for the current shard, 30 days.
pub const FILE_AGE_LIMIT: std::time::Duration = std::time::Duration::from_secs(30 * 24 * 3600);
/// Default size limit, in bytes, for the current shard.
pub const FILE_SIZE_LIMIT: u64 = i32::MAX as u64;
/// Default time to wait for background workers while closing.
pub const GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(3);

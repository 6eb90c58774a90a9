use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use std::{ffi, fmt, result};

use crate::Result;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Shard file name, `format!("{}.{}.table", prefix, timestamp)`, where
/// timestamp is the creation time, in UTC, formatted as
/// `yyyyMMddHHmmssSSS`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShardName(pub ffi::OsString);

impl From<(String, DateTime<Utc>)> for ShardName {
    fn from((prefix, ts): (String, DateTime<Utc>)) -> ShardName {
        let file_name = format!("{}.{}.table", prefix, ts.format(TIMESTAMP_FORMAT));
        ShardName(AsRef::<ffi::OsStr>::as_ref(&file_name).to_os_string())
    }
}

impl From<ShardName> for ffi::OsString {
    fn from(name: ShardName) -> ffi::OsString {
        name.0
    }
}

impl ShardName {
    /// Parse the creation time of a shard named with `prefix`. Fail with
    /// `InvalidFile` if file name does not belong to a shard of `prefix`.
    pub fn to_timestamp(&self, prefix: &str) -> Result<DateTime<Utc>> {
        let re = {
            let pattern = format!(r"^{}\.(\d{{17}})\.table$", regex::escape(prefix));
            err_at!(Fatal, Regex::new(&pattern))?
        };

        let digits = self
            .0
            .to_str()
            .and_then(|name| re.captures(name))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());
        let digits = match digits {
            Some(digits) => digits,
            None => err_at!(InvalidFile, msg: "{:?} not a shard of {:?}", self.0, prefix)?,
        };

        let (secs, millis) = digits.split_at(14);
        let naive = err_at!(
            InvalidFile,
            NaiveDateTime::parse_from_str(secs, "%Y%m%d%H%M%S"),
            "shard {:?}",
            self.0
        )?;
        let millis: i64 = err_at!(InvalidFile, millis.parse())?;
        Ok(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(millis))
    }

    /// Return true if this file name belongs to a shard of `prefix`.
    pub fn is_shard(&self, prefix: &str) -> bool {
        self.to_timestamp(prefix).is_ok()
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self.0.to_str() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{:?}", self.0),
        }
    }
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;

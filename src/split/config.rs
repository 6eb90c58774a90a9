use std::{convert::TryFrom, ffi, time};

use crate::{
    split::{FILE_AGE_LIMIT, FILE_SIZE_LIMIT, GRACE_PERIOD},
    table, Error, Result,
};

/// Configuration for [SplitTable][crate::split::SplitTable].
///
/// Can be loaded from TOML, for example:
///
/// ```toml
/// dir = "/opt/data/urls"
/// prefix = "urls"
/// file_age_limit = 86400     # seconds
/// file_size_limit = 1048576  # bytes
/// grace_period = 3000        # milliseconds
///
/// [table]
/// layout = { key_len = 12, tail_len = 20, order = "base64" }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Directory holding the shard files.
    pub dir: ffi::OsString,
    /// Shard files are named with this prefix.
    pub prefix: String,
    /// Configuration for every shard.
    pub table: table::Config,
    /// Retire current shard once it is older than this.
    ///
    /// Default: [FILE_AGE_LIMIT]
    pub file_age_limit: time::Duration,
    /// Retire current shard once its file grows beyond this many bytes.
    ///
    /// Default: [FILE_SIZE_LIMIT]
    pub file_size_limit: u64,
    /// Time to wait for background workers while closing.
    ///
    /// Default: [GRACE_PERIOD]
    pub grace_period: time::Duration,
}

impl<'a> arbitrary::Arbitrary<'a> for Config {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let prefix = u.choose(&["urls", "words", "idx-x"])?.to_string();
        let dir = std::env::temp_dir().into_os_string();
        let table: table::Config = u.arbitrary()?;

        let mut config = Config::new(&dir, &prefix, table);
        let size = *u.choose(&[0, 100, 1000, 10_000, FILE_SIZE_LIMIT])?;
        config.set_file_size_limit(size);
        Ok(config)
    }
}

impl TryFrom<toml::Value> for Config {
    type Error = Error;

    fn try_from(value: toml::Value) -> Result<Config> {
        let dir = match value.get("dir").and_then(|v| v.as_str()) {
            Some(dir) => dir,
            None => err_at!(InvalidInput, msg: "split config missing dir")?,
        };
        let prefix = match value.get("prefix").and_then(|v| v.as_str()) {
            Some(prefix) => prefix,
            None => err_at!(InvalidInput, msg: "split config missing prefix")?,
        };
        let table = match value.get("table") {
            Some(table) => table::Config::try_from(table.clone())?,
            None => err_at!(InvalidInput, msg: "split config missing table")?,
        };

        let mut config = Config::new(dir.as_ref(), prefix, table);
        if let Some(secs) = to_u64(&value, "file_age_limit")? {
            config.set_file_age_limit(time::Duration::from_secs(secs));
        }
        if let Some(size) = to_u64(&value, "file_size_limit")? {
            config.set_file_size_limit(size);
        }
        if let Some(millis) = to_u64(&value, "grace_period")? {
            config.set_grace_period(time::Duration::from_millis(millis));
        }
        Ok(config)
    }
}

fn to_u64(value: &toml::Value, key: &str) -> Result<Option<u64>> {
    match value.get(key) {
        Some(toml::Value::Integer(val)) => Ok(Some(err_at!(FailConvert, u64::try_from(*val))?)),
        Some(val) => err_at!(InvalidInput, msg: "{} invalid value {}", key, val),
        None => Ok(None),
    }
}

impl Config {
    pub fn new(dir: &ffi::OsStr, prefix: &str, table: table::Config) -> Config {
        Config {
            dir: dir.to_os_string(),
            prefix: prefix.to_string(),
            table,
            file_age_limit: FILE_AGE_LIMIT,
            file_size_limit: FILE_SIZE_LIMIT,
            grace_period: GRACE_PERIOD,
        }
    }

    pub fn set_file_age_limit(&mut self, limit: time::Duration) -> &mut Self {
        self.file_age_limit = limit;
        self
    }

    pub fn set_file_size_limit(&mut self, limit: u64) -> &mut Self {
        self.file_size_limit = limit;
        self
    }

    pub fn set_grace_period(&mut self, grace: time::Duration) -> &mut Self {
        self.grace_period = grace;
        self
    }
}

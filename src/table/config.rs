use serde::{Deserialize, Serialize};

use std::convert::TryFrom;

use crate::{store, Error, Result, RowLayout};

/// Configuration for [Table][crate::table::Table].
///
/// Configuration can be composed with `set_*` methods, or loaded from a
/// TOML table, for example:
///
/// ```toml
/// layout = { key_len = 12, tail_len = 20, order = "base64" }
/// buffer_size = 20
/// tail_cache = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Shape of every row in the table.
    pub layout: RowLayout,
    /// Number of appended records to buffer before writing them to file.
    ///
    /// Default: [store::BUFFER_SIZE]
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Expected number of rows, used when estimating memory requirements
    /// for a fresh table.
    ///
    /// Default: 0
    #[serde(default)]
    pub initial_capacity: usize,
    /// Keep a copy of every row's tail in memory, if memory permits.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub tail_cache: bool,
    /// Allow tail-cache beyond [MAX_ARRAY_LEN][crate::table::MAX_ARRAY_LEN]
    /// entries.
    ///
    /// Default: false
    #[serde(default)]
    pub large_index: bool,
    /// Repair duplicate keys while opening the table. When false, the
    /// repair is deferred until `Table::warm_up()` is called.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub warm_up: bool,
}

fn default_buffer_size() -> usize {
    store::BUFFER_SIZE
}

fn default_true() -> bool {
    true
}

impl<'a> arbitrary::Arbitrary<'a> for Config {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let layout: RowLayout = u.arbitrary()?;
        let mut config = Config::new(layout);
        config
            .set_buffer_size(*u.choose(&[0, 1, 3, 20, 100])?)
            .set_tail_cache(u.arbitrary()?)
            .set_warm_up(u.arbitrary()?);
        Ok(config)
    }
}

impl TryFrom<toml::Value> for Config {
    type Error = Error;

    fn try_from(value: toml::Value) -> Result<Config> {
        let config: Config = err_at!(InvalidInput, value.try_into())?;
        config.layout.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Create a new configuration value, use the `set_*` methods to add more
    /// configuration.
    pub fn new(layout: RowLayout) -> Config {
        Config {
            layout,
            buffer_size: store::BUFFER_SIZE,
            initial_capacity: 0,
            tail_cache: true,
            large_index: false,
            warm_up: true,
        }
    }

    pub fn set_buffer_size(&mut self, buffer_size: usize) -> &mut Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn set_initial_capacity(&mut self, capacity: usize) -> &mut Self {
        self.initial_capacity = capacity;
        self
    }

    /// Enable or disable the in-memory copy of row tails.
    pub fn set_tail_cache(&mut self, tail_cache: bool) -> &mut Self {
        self.tail_cache = tail_cache;
        self
    }

    pub fn set_large_index(&mut self, large_index: bool) -> &mut Self {
        self.large_index = large_index;
        self
    }

    pub fn set_warm_up(&mut self, warm_up: bool) -> &mut Self {
        self.warm_up = warm_up;
        self
    }
}

//! String-keyed configuration with typed accessors.

use ahash::AHashMap;
use lattice_common::{error::Error, Result};

/// Option keys recognized by the read path.
pub mod keys {
    /// Total bytes of fixed tiles allowed in flight per partition.
    pub const MEMORY_BUDGET: &str = "sm.memory_budget";
    /// Same, for variable-length value tiles.
    pub const MEMORY_BUDGET_VAR: &str = "sm.memory_budget_var";
    /// Byte budget of the shared tile cache.
    pub const TILE_CACHE_SIZE: &str = "sm.tile_cache_size";
}

#[derive(Debug, Clone)]
pub struct Config {
    options: AHashMap<String, String>,
}

impl Default for Config {
    fn default() -> Config {
        let mut options = AHashMap::new();
        options.insert(keys::MEMORY_BUDGET.to_string(), "5368709120".to_string());
        options.insert(
            keys::MEMORY_BUDGET_VAR.to_string(),
            "10737418240".to_string(),
        );
        options.insert(keys::TILE_CACHE_SIZE.to_string(), "10000000".to_string());
        Config { options }
    }
}

impl Config {
    pub fn new() -> Config {
        Default::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Config {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Parses `key` as an unsigned integer; a missing or malformed value is
    /// a [`ConfigParse`](lattice_common::error::ErrorKind::ConfigParse) error.
    pub fn get_u64(&self, key: &str) -> Result<u64> {
        let value = self
            .get(key)
            .ok_or_else(|| Error::config_parse(key, "option not set"))?;
        value
            .parse::<u64>()
            .map_err(|e| Error::config_parse(key, e.to_string()))
    }
}

//! Cache configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Entry registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the on-disk cache (bucket directories live below it)
    pub cache_dir: PathBuf,
    /// Adopt cache files left by a previous run instead of overwriting them
    pub restore_existing: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("framecache"),
            restore_existing: true,
        }
    }
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_restore_existing(mut self, restore: bool) -> Self {
        self.restore_existing = restore;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir must not be empty".to_string()));
        }
        if self.cache_dir.is_file() {
            return Err(Error::Config(format!(
                "cache_dir {} is a regular file",
                self.cache_dir.display()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

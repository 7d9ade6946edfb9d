//! Configuration for AtlasDB
//!
//! Engine-wide settings with sensible defaults. Per column family tuning
//! lives in [`crate::options::ColumnFamilyOptions`].

use std::path::PathBuf;

use tracing::warn;

use crate::options::ColumnFamilyOptions;

/// Main configuration for an AtlasDB engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Directory for write-ahead log files. `None` keeps the log in memory.
    /// Internal structure:
    ///   {wal_dir}/
    ///     ├── 000001.log
    ///     └── 000007.log       (one file per memtable generation)
    pub wal_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Background Work Configuration
    // -------------------------------------------------------------------------
    /// Worker threads dedicated to memtable flushes (at least 1)
    pub max_background_flushes: usize,

    /// Worker threads dedicated to compactions (0 disables compaction)
    pub max_background_compactions: usize,

    // -------------------------------------------------------------------------
    // Backpressure Configuration
    // -------------------------------------------------------------------------
    /// Write rate (bytes per microsecond) while writes are being delayed
    pub delayed_write_rate: u64,

    // -------------------------------------------------------------------------
    // Failure Handling
    // -------------------------------------------------------------------------
    /// Treat failed log or memtable writes as fatal background errors
    pub paranoid_checks: bool,

    // -------------------------------------------------------------------------
    // Column Family Defaults
    // -------------------------------------------------------------------------
    /// Options of the default column family
    pub default_cf_options: ColumnFamilyOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_dir: None,
            max_background_flushes: 1,
            max_background_compactions: 1,
            delayed_write_rate: 2, // 2 MB/s
            paranoid_checks: true,
            default_cf_options: ColumnFamilyOptions::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Fix up values the engine cannot run with.
    pub fn sanitize(mut self) -> Self {
        if self.max_background_flushes == 0 {
            warn!("max_background_flushes raised to 1");
            self.max_background_flushes = 1;
        }
        if self.delayed_write_rate == 0 {
            warn!("delayed_write_rate raised to 1");
            self.delayed_write_rate = 1;
        }
        self.default_cf_options = self.default_cf_options.sanitize();
        self
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Keep log files in this directory
    pub fn wal_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wal_dir = Some(path.into());
        self
    }

    pub fn max_background_flushes(mut self, count: usize) -> Self {
        self.config.max_background_flushes = count;
        self
    }

    pub fn max_background_compactions(mut self, count: usize) -> Self {
        self.config.max_background_compactions = count;
        self
    }

    /// Set the delayed write rate (bytes per microsecond)
    pub fn delayed_write_rate(mut self, rate: u64) -> Self {
        self.config.delayed_write_rate = rate;
        self
    }

    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.config.paranoid_checks = enabled;
        self
    }

    pub fn default_cf_options(mut self, options: ColumnFamilyOptions) -> Self {
        self.config.default_cf_options = options;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

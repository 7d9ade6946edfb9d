//! Per column family tuning and per call options.
//!
//! `ColumnFamilyOptions::sanitize` clamps user supplied values into the range
//! the write path relies on (at least two write buffers, slowdown trigger not
//! above the stop trigger, and so on) and logs every adjustment.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::comparator::{BytewiseComparator, Comparator, MergeOperator};
use crate::types::SequenceNumber;

const MIN_WRITE_BUFFER_SIZE: u64 = 64 << 10;
const MAX_WRITE_BUFFER_SIZE: u64 = 64 << 30;

/// Options of one column family
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    // -------------------------------------------------------------------------
    // Memtable Configuration
    // -------------------------------------------------------------------------
    /// Approximate memtable size (in bytes) that triggers a flush request
    pub write_buffer_size: u64,

    /// Memtables (active plus immutable) allowed before writes stop
    pub max_write_buffer_number: usize,

    /// Immutable memtables required before a flush is scheduled
    pub min_write_buffer_number_to_merge: usize,

    // -------------------------------------------------------------------------
    // Level Configuration
    // -------------------------------------------------------------------------
    pub num_levels: usize,

    /// Level-0 file count that makes level 0 eligible for compaction
    pub level0_file_num_compaction_trigger: usize,

    /// Level-0 file count at which writes are throttled
    pub level0_slowdown_writes_trigger: usize,

    /// Level-0 file count at which writes stop
    pub level0_stop_writes_trigger: usize,

    /// Target size of level 1 (in bytes)
    pub max_bytes_for_level_base: u64,

    /// Size ratio between consecutive levels
    pub max_bytes_for_level_multiplier: u64,

    pub disable_auto_compactions: bool,

    // -------------------------------------------------------------------------
    // Key Semantics
    // -------------------------------------------------------------------------
    pub comparator: Arc<dyn Comparator>,

    pub merge_operator: Option<Arc<dyn MergeOperator>>,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
            max_write_buffer_number: 2,
            min_write_buffer_number_to_merge: 1,
            num_levels: 7,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 20,
            level0_stop_writes_trigger: 24,
            max_bytes_for_level_base: 10 * 1024 * 1024, // 10 MB
            max_bytes_for_level_multiplier: 10,
            disable_auto_compactions: false,
            comparator: Arc::new(BytewiseComparator),
            merge_operator: None,
        }
    }
}

impl fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("min_write_buffer_number_to_merge", &self.min_write_buffer_number_to_merge)
            .field("num_levels", &self.num_levels)
            .field("level0_file_num_compaction_trigger", &self.level0_file_num_compaction_trigger)
            .field("level0_slowdown_writes_trigger", &self.level0_slowdown_writes_trigger)
            .field("level0_stop_writes_trigger", &self.level0_stop_writes_trigger)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field("max_bytes_for_level_multiplier", &self.max_bytes_for_level_multiplier)
            .field("disable_auto_compactions", &self.disable_auto_compactions)
            .field("comparator", &self.comparator.name())
            .field("merge_operator", &self.merge_operator.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl ColumnFamilyOptions {
    /// Create a new options builder
    pub fn builder() -> ColumnFamilyOptionsBuilder {
        ColumnFamilyOptionsBuilder::default()
    }

    /// Clamp every field into the range the engine supports.
    pub fn sanitize(mut self) -> Self {
        let clamped = self.write_buffer_size.clamp(MIN_WRITE_BUFFER_SIZE, MAX_WRITE_BUFFER_SIZE);
        if clamped != self.write_buffer_size {
            warn!(requested = self.write_buffer_size, clamped, "write_buffer_size out of range");
            self.write_buffer_size = clamped;
        }

        if self.max_write_buffer_number < 2 {
            warn!(requested = self.max_write_buffer_number, "max_write_buffer_number raised to 2");
            self.max_write_buffer_number = 2;
        }

        let merge_cap = self.max_write_buffer_number - 1;
        if self.min_write_buffer_number_to_merge > merge_cap {
            warn!(
                requested = self.min_write_buffer_number_to_merge,
                cap = merge_cap,
                "min_write_buffer_number_to_merge lowered"
            );
            self.min_write_buffer_number_to_merge = merge_cap;
        }
        if self.min_write_buffer_number_to_merge < 1 {
            self.min_write_buffer_number_to_merge = 1;
        }

        if self.num_levels < 2 {
            warn!(requested = self.num_levels, "num_levels raised to 2");
            self.num_levels = 2;
        }

        if self.level0_file_num_compaction_trigger < 1 {
            self.level0_file_num_compaction_trigger = 1;
        }
        if self.level0_slowdown_writes_trigger < self.level0_file_num_compaction_trigger {
            warn!(
                slowdown = self.level0_slowdown_writes_trigger,
                compaction = self.level0_file_num_compaction_trigger,
                "level0_slowdown_writes_trigger raised to the compaction trigger"
            );
            self.level0_slowdown_writes_trigger = self.level0_file_num_compaction_trigger;
        }
        if self.level0_stop_writes_trigger < self.level0_slowdown_writes_trigger {
            warn!(
                stop = self.level0_stop_writes_trigger,
                slowdown = self.level0_slowdown_writes_trigger,
                "level0_stop_writes_trigger raised to the slowdown trigger"
            );
            self.level0_stop_writes_trigger = self.level0_slowdown_writes_trigger;
        }

        if self.max_bytes_for_level_multiplier < 2 {
            self.max_bytes_for_level_multiplier = 2;
        }
        self
    }

    /// Size target of `level` (level 1 and deeper).
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut bytes = self.max_bytes_for_level_base;
        for _ in 1..level {
            bytes = bytes.saturating_mul(self.max_bytes_for_level_multiplier);
        }
        bytes
    }
}

/// Builder for ColumnFamilyOptions
#[derive(Default)]
pub struct ColumnFamilyOptionsBuilder {
    options: ColumnFamilyOptions,
}

impl ColumnFamilyOptionsBuilder {
    pub fn write_buffer_size(mut self, bytes: u64) -> Self {
        self.options.write_buffer_size = bytes;
        self
    }

    pub fn max_write_buffer_number(mut self, count: usize) -> Self {
        self.options.max_write_buffer_number = count;
        self
    }

    pub fn min_write_buffer_number_to_merge(mut self, count: usize) -> Self {
        self.options.min_write_buffer_number_to_merge = count;
        self
    }

    pub fn num_levels(mut self, levels: usize) -> Self {
        self.options.num_levels = levels;
        self
    }

    pub fn level0_file_num_compaction_trigger(mut self, count: usize) -> Self {
        self.options.level0_file_num_compaction_trigger = count;
        self
    }

    pub fn level0_slowdown_writes_trigger(mut self, count: usize) -> Self {
        self.options.level0_slowdown_writes_trigger = count;
        self
    }

    pub fn level0_stop_writes_trigger(mut self, count: usize) -> Self {
        self.options.level0_stop_writes_trigger = count;
        self
    }

    pub fn max_bytes_for_level_base(mut self, bytes: u64) -> Self {
        self.options.max_bytes_for_level_base = bytes;
        self
    }

    pub fn disable_auto_compactions(mut self, disable: bool) -> Self {
        self.options.disable_auto_compactions = disable;
        self
    }

    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.options.comparator = comparator;
        self
    }

    pub fn merge_operator(mut self, operator: Arc<dyn MergeOperator>) -> Self {
        self.options.merge_operator = Some(operator);
        self
    }

    pub fn build(self) -> ColumnFamilyOptions {
        self.options
    }
}

/// Options for a single write call
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the log before the write returns
    pub sync: bool,

    /// Skip the log entirely
    pub disable_wal: bool,

    /// Silently skip records addressed to unknown column families
    pub ignore_missing_column_families: bool,

    /// Fail with `Busy` instead of waiting out a write stall
    pub no_slowdown: bool,
}

impl WriteOptions {
    pub fn sync() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    pub fn without_wal() -> Self {
        Self {
            disable_wal: true,
            ..Self::default()
        }
    }
}

/// Options for a point lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Read as of this sequence number instead of the latest one
    pub snapshot: Option<SequenceNumber>,
}

/// Options for a manual flush
#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    /// Block until the flushed memtables are persisted
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}

//! State guarded by the engine lock, and engine counters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::column_family::{ColumnFamilyData, ColumnFamilySet};
use crate::snapshot::SnapshotList;
use crate::version::FileMetaData;

pub(crate) struct DbState {
    pub column_families: ColumnFamilySet,

    // -------------------------------------------------------------------------
    // Background Scheduling
    // -------------------------------------------------------------------------
    /// Families waiting for a flush; each entry holds a reference.
    pub flush_queue: VecDeque<Arc<ColumnFamilyData>>,
    /// Families waiting for a compaction; each entry holds a reference.
    pub compaction_queue: VecDeque<Arc<ColumnFamilyData>>,
    pub unscheduled_flushes: usize,
    pub unscheduled_compactions: usize,
    pub bg_flush_scheduled: usize,
    pub bg_compaction_scheduled: usize,

    // -------------------------------------------------------------------------
    // Write Path
    // -------------------------------------------------------------------------
    /// Bytes of the previous group, charged against the delay bucket.
    pub last_batch_group_size: usize,
    pub snapshots: SnapshotList,

    // -------------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------------
    /// Logs and tables share one number space.
    pub next_file_number: u64,
    pub logfile_number: u64,
    /// Nothing has been written to the current log yet.
    pub log_empty: bool,
    /// Logs not yet deleted, oldest first.
    pub alive_logs: VecDeque<u64>,
    /// Tables removed from a version; deletable once nothing else holds them.
    pub obsolete_candidates: Vec<Arc<FileMetaData>>,
}

impl DbState {
    pub fn new(column_families: ColumnFamilySet) -> Self {
        Self {
            column_families,
            flush_queue: VecDeque::new(),
            compaction_queue: VecDeque::new(),
            unscheduled_flushes: 0,
            unscheduled_compactions: 0,
            bg_flush_scheduled: 0,
            bg_compaction_scheduled: 0,
            last_batch_group_size: 0,
            snapshots: SnapshotList::new(),
            next_file_number: 1,
            logfile_number: 0,
            log_empty: true,
            alive_logs: VecDeque::new(),
            obsolete_candidates: Vec::new(),
        }
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Writes a thread committed as group leader
    pub writes_done_by_self: u64,
    /// Writes committed on a thread's behalf by another leader
    pub writes_done_by_other: u64,
    pub write_groups: u64,
    pub wal_records: u64,
    pub wal_bytes: u64,
    pub wal_syncs: u64,
    pub keys_written: u64,
    pub bytes_written: u64,
    /// Writes that were delayed or stopped before commit
    pub write_stalls: u64,
    pub stall_micros: u64,
    pub memtable_switches: u64,
    pub flushes_completed: u64,
    pub compactions_completed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub writes_done_by_self: AtomicU64,
    pub writes_done_by_other: AtomicU64,
    pub write_groups: AtomicU64,
    pub wal_records: AtomicU64,
    pub wal_bytes: AtomicU64,
    pub wal_syncs: AtomicU64,
    pub keys_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub write_stalls: AtomicU64,
    pub stall_micros: AtomicU64,
    pub memtable_switches: AtomicU64,
    pub flushes_completed: AtomicU64,
    pub compactions_completed: AtomicU64,
}

impl StatsCounters {
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStats {
            writes_done_by_self: load(&self.writes_done_by_self),
            writes_done_by_other: load(&self.writes_done_by_other),
            write_groups: load(&self.write_groups),
            wal_records: load(&self.wal_records),
            wal_bytes: load(&self.wal_bytes),
            wal_syncs: load(&self.wal_syncs),
            keys_written: load(&self.keys_written),
            bytes_written: load(&self.bytes_written),
            write_stalls: load(&self.write_stalls),
            stall_micros: load(&self.stall_micros),
            memtable_switches: load(&self.memtable_switches),
            flushes_completed: load(&self.flushes_completed),
            compactions_completed: load(&self.compactions_completed),
        }
    }
}

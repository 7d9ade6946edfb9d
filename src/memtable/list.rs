//! Immutable memtable list
//!
//! `MemTableList` owns the current `MemTableListVersion`. Every change builds
//! a fresh version and releases the previous one, so a version referenced by
//! a super version never changes underneath its readers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::MemTable;
use crate::lookup::GetContext;
use crate::version::FileMetaData;

/// Refcounted snapshot of the immutable memtables, newest first.
pub struct MemTableListVersion {
    memlist: Vec<Arc<MemTable>>,
    refs: AtomicU32,
}

impl MemTableListVersion {
    fn new(memlist: Vec<Arc<MemTable>>) -> Self {
        for mem in &memlist {
            mem.ref_();
        }
        Self {
            memlist,
            refs: AtomicU32::new(0),
        }
    }

    /// Newest first
    pub fn memtables(&self) -> &[Arc<MemTable>] {
        &self.memlist
    }

    pub fn len(&self) -> usize {
        self.memlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memlist.is_empty()
    }

    /// Search newest to oldest. Returns true when the lookup is settled.
    pub fn get(&self, ctx: &mut GetContext<'_>) -> bool {
        self.memlist.iter().any(|mem| mem.get(ctx))
    }

    pub fn ref_(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. The last one releases this version's reference on
    /// every memtable and moves memtables that reach zero into `to_delete`.
    pub fn unref(&self, to_delete: &mut Vec<Arc<MemTable>>) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "memtable list version unref below zero");
        if prev != 1 {
            return false;
        }
        for mem in &self.memlist {
            if mem.unref() {
                to_delete.push(Arc::clone(mem));
            }
        }
        true
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }
}

/// Immutable memtables of one column family awaiting flush.
///
/// Mutated only with the engine lock held.
pub struct MemTableList {
    current: Arc<MemTableListVersion>,
    min_write_buffer_number_to_merge: usize,
    num_flush_not_started: usize,
    flush_requested: bool,
}

impl MemTableList {
    pub fn new(min_write_buffer_number_to_merge: usize) -> Self {
        let current = Arc::new(MemTableListVersion::new(Vec::new()));
        current.ref_();
        Self {
            current,
            min_write_buffer_number_to_merge,
            num_flush_not_started: 0,
            flush_requested: false,
        }
    }

    pub fn current(&self) -> Arc<MemTableListVersion> {
        Arc::clone(&self.current)
    }

    /// Immutable memtables not yet installed as table files
    pub fn num_not_flushed(&self) -> usize {
        self.current.len()
    }

    /// Immutable memtables no flush job has picked
    pub fn num_flush_not_started(&self) -> usize {
        self.num_flush_not_started
    }

    /// Retire `mem` into the list.
    pub fn add(&mut self, mem: Arc<MemTable>, to_delete: &mut Vec<Arc<MemTable>>) {
        let mut memlist = Vec::with_capacity(self.current.len() + 1);
        memlist.push(mem);
        memlist.extend(self.current.memtables().iter().cloned());
        self.install_version(memlist, to_delete);
        self.num_flush_not_started += 1;
    }

    fn install_version(&mut self, memlist: Vec<Arc<MemTable>>, to_delete: &mut Vec<Arc<MemTable>>) {
        let version = Arc::new(MemTableListVersion::new(memlist));
        version.ref_();
        let old = std::mem::replace(&mut self.current, version);
        old.unref(to_delete);
    }

    /// Ask for a flush regardless of `min_write_buffer_number_to_merge`.
    pub fn flush_requested(&mut self) {
        self.flush_requested = true;
    }

    pub fn is_flush_pending(&self) -> bool {
        (self.flush_requested && self.num_flush_not_started > 0)
            || self.num_flush_not_started >= self.min_write_buffer_number_to_merge
    }

    /// Claim every memtable no other flush is working on, oldest first.
    pub fn pick_memtables_to_flush(&mut self) -> Vec<Arc<MemTable>> {
        let mut picked = Vec::new();
        for mem in self.current.memtables().iter().rev() {
            if !mem.flush_in_progress() {
                mem.begin_flush();
                self.num_flush_not_started -= 1;
                picked.push(Arc::clone(mem));
            }
        }
        self.flush_requested = false;
        picked
    }

    /// Return picked memtables to the unflushed pool after a failed flush.
    pub fn rollback_memtable_flush(&mut self, mems: &[Arc<MemTable>]) {
        for mem in mems {
            debug_assert!(mem.flush_in_progress());
            mem.reset_flush();
            self.num_flush_not_started += 1;
        }
        debug!(count = mems.len(), "rolled back memtable flush");
    }

    /// Record `output` for `mems`, then retire the longest run of completed
    /// memtables starting from the oldest. Flushes that finish out of order
    /// wait for older ones so tables are installed in memtable order.
    /// Returns the retired memtables, oldest first.
    pub fn install_memtable_flush_results(
        &mut self,
        mems: &[Arc<MemTable>],
        output: Option<Arc<FileMetaData>>,
        to_delete: &mut Vec<Arc<MemTable>>,
    ) -> Vec<Arc<MemTable>> {
        for mem in mems {
            mem.complete_flush(output.clone());
        }

        let removed: Vec<Arc<MemTable>> = self
            .current
            .memtables()
            .iter()
            .rev()
            .take_while(|mem| mem.flush_completed())
            .cloned()
            .collect();
        if removed.is_empty() {
            return removed;
        }

        let keep = self.current.len() - removed.len();
        let remaining: Vec<Arc<MemTable>> = self.current.memtables()[..keep].to_vec();
        self.install_version(remaining, to_delete);
        removed
    }
}

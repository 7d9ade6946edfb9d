//! MemTable implementation
//!
//! BTreeMap keyed by (user key, newest sequence first) behind a RwLock. The
//! write thread guarantees a single inserter at a time; readers run
//! concurrently through the read lock.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::lookup::GetContext;
use crate::types::{InternalEntry, SequenceNumber, ValueType};
use crate::version::FileMetaData;

/// Fixed per-entry overhead added to the size estimate
const ENTRY_OVERHEAD: u64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MemKey {
    user_key: Vec<u8>,
    sequence: Reverse<SequenceNumber>,
}

/// Progress of a memtable towards becoming a table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushState {
    NotRequested = 0,
    Requested = 1,
    Scheduled = 2,
}

#[derive(Debug, Default)]
struct FlushProgress {
    in_progress: bool,
    completed: bool,
    output: Option<Arc<FileMetaData>>,
}

/// In-memory write buffer
pub struct MemTable {
    id: u64,
    table: RwLock<BTreeMap<MemKey, (ValueType, Vec<u8>)>>,
    write_buffer_size: u64,
    approximate_memory_usage: AtomicU64,
    num_entries: AtomicU64,
    num_deletes: AtomicU64,
    first_sequence: AtomicU64,
    flush_state: AtomicU8,
    refs: AtomicU32,
    /// Log opened when this memtable was retired; older logs are not needed
    /// once it is flushed.
    next_log_number: AtomicU64,
    flush: Mutex<FlushProgress>,
}

impl MemTable {
    pub fn new(id: u64, write_buffer_size: u64) -> Self {
        Self {
            id,
            table: RwLock::new(BTreeMap::new()),
            write_buffer_size,
            approximate_memory_usage: AtomicU64::new(0),
            num_entries: AtomicU64::new(0),
            num_deletes: AtomicU64::new(0),
            first_sequence: AtomicU64::new(0),
            flush_state: AtomicU8::new(FlushState::NotRequested as u8),
            refs: AtomicU32::new(0),
            next_log_number: AtomicU64::new(0),
            flush: Mutex::new(FlushProgress::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    // =========================================================================
    // Writes and Reads
    // =========================================================================

    /// Insert one versioned entry. Callers serialize inserts.
    pub fn add(&self, sequence: SequenceNumber, kind: ValueType, key: &[u8], value: &[u8]) {
        let charge = key.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD;
        self.table.write().insert(
            MemKey {
                user_key: key.to_vec(),
                sequence: Reverse(sequence),
            },
            (kind, value.to_vec()),
        );
        let usage = self.approximate_memory_usage.fetch_add(charge, Ordering::Relaxed) + charge;
        self.num_entries.fetch_add(1, Ordering::Relaxed);
        if kind == ValueType::Deletion {
            self.num_deletes.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self
            .first_sequence
            .compare_exchange(0, sequence, Ordering::AcqRel, Ordering::Acquire);

        if usage >= self.write_buffer_size {
            let _ = self.flush_state.compare_exchange(
                FlushState::NotRequested as u8,
                FlushState::Requested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Feed versions of the looked-up key visible at the context's snapshot.
    /// Returns true when the lookup is settled.
    pub fn get(&self, ctx: &mut GetContext<'_>) -> bool {
        let table = self.table.read();
        let start = MemKey {
            user_key: ctx.user_key().to_vec(),
            sequence: Reverse(ctx.snapshot()),
        };
        for (key, (kind, value)) in table.range(start..) {
            if key.user_key.as_slice() != ctx.user_key() {
                break;
            }
            if ctx.save_value(*kind, value) {
                return true;
            }
        }
        false
    }

    /// Every entry in key order, newest version of each key first.
    pub fn entries(&self) -> Vec<InternalEntry> {
        self.table
            .read()
            .iter()
            .map(|(key, (kind, value))| InternalEntry {
                user_key: key.user_key.clone(),
                sequence: key.sequence.0,
                kind: *kind,
                value: value.clone(),
            })
            .collect()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn approximate_memory_usage(&self) -> u64 {
        self.approximate_memory_usage.load(Ordering::Relaxed)
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries.load(Ordering::Relaxed)
    }

    pub fn num_deletes(&self) -> u64 {
        self.num_deletes.load(Ordering::Relaxed)
    }

    /// Sequence of the first insert, 0 while empty
    pub fn first_sequence(&self) -> SequenceNumber {
        self.first_sequence.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.first_sequence() == 0
    }

    // =========================================================================
    // Flush Triggering
    // =========================================================================

    pub fn flush_state(&self) -> FlushState {
        match self.flush_state.load(Ordering::Acquire) {
            0 => FlushState::NotRequested,
            1 => FlushState::Requested,
            _ => FlushState::Scheduled,
        }
    }

    /// True once the memtable is full and nobody has scheduled its flush yet
    pub fn should_schedule_flush(&self) -> bool {
        self.flush_state() == FlushState::Requested
    }

    /// Claim the flush request. Only the first caller gets true.
    pub fn mark_flush_scheduled(&self) -> bool {
        self.flush_state
            .compare_exchange(
                FlushState::Requested as u8,
                FlushState::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    pub fn ref_(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one logical reference; true if it was the last one.
    pub fn unref(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "memtable {} unref below zero", self.id);
        prev == 1
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    // =========================================================================
    // Flush Bookkeeping (engine lock held)
    // =========================================================================

    pub fn set_next_log_number(&self, number: u64) {
        self.next_log_number.store(number, Ordering::Release);
    }

    pub fn next_log_number(&self) -> u64 {
        self.next_log_number.load(Ordering::Acquire)
    }

    pub fn flush_in_progress(&self) -> bool {
        self.flush.lock().in_progress
    }

    pub fn flush_completed(&self) -> bool {
        self.flush.lock().completed
    }

    pub(crate) fn begin_flush(&self) {
        let mut flush = self.flush.lock();
        flush.in_progress = true;
        flush.completed = false;
        flush.output = None;
    }

    pub(crate) fn complete_flush(&self, output: Option<Arc<FileMetaData>>) {
        let mut flush = self.flush.lock();
        flush.completed = true;
        flush.output = output;
    }

    pub(crate) fn reset_flush(&self) {
        let mut flush = self.flush.lock();
        flush.in_progress = false;
        flush.completed = false;
        flush.output = None;
    }

    pub(crate) fn flush_output(&self) -> Option<Arc<FileMetaData>> {
        self.flush.lock().output.clone()
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("id", &self.id)
            .field("entries", &self.num_entries())
            .field("bytes", &self.approximate_memory_usage())
            .field("refs", &self.refs())
            .finish()
    }
}

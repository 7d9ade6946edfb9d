//! Super Version Module
//!
//! An immutable bundle of everything a read needs from one column family:
//! the active memtable, the immutable memtable list version and the on-disk
//! version, stamped with the column family's super version number.
//!
//! ## Lifecycle
//! ```text
//!   new() ── refs = 1 (held by the column family)
//!     │
//!     ├── ref_() / unref()     readers and thread-local caches
//!     │
//!     └── unref() == true      exactly one caller sees the last reference
//!             │
//!             ├── prepare_release()   engine lock held: drop memtable refs,
//!             │                       collect memtables that reached zero
//!             └── finish_release()    lock released: free them
//! ```
//! Memory is owned by `Arc`; `refs` tracks logical ownership so the expensive
//! part of teardown never runs while the engine lock is held.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::memtable::{MemTable, MemTableListVersion};
use crate::options::ColumnFamilyOptions;
use crate::version::Version;

pub struct SuperVersion {
    pub mem: Arc<MemTable>,
    pub imm: Arc<MemTableListVersion>,
    pub current: Arc<Version>,
    pub options: Arc<ColumnFamilyOptions>,
    pub version_number: u64,
    refs: AtomicU32,
    released: AtomicBool,
    to_delete: Mutex<Vec<Arc<MemTable>>>,
}

impl SuperVersion {
    /// Take references on `mem` and `imm`. The result starts with one
    /// reference owned by the caller.
    pub fn new(
        mem: Arc<MemTable>,
        imm: Arc<MemTableListVersion>,
        current: Arc<Version>,
        options: Arc<ColumnFamilyOptions>,
        version_number: u64,
    ) -> Arc<Self> {
        mem.ref_();
        imm.ref_();
        Arc::new(Self {
            mem,
            imm,
            current,
            options,
            version_number,
            refs: AtomicU32::new(1),
            released: AtomicBool::new(false),
            to_delete: Mutex::new(Vec::new()),
        })
    }

    pub fn ref_(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; true for the single caller that dropped the last.
    pub fn unref(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "super version {} unref below zero", self.version_number);
        prev == 1
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// First half of teardown, engine lock held. Releases this bundle's
    /// memtable references and parks memtables that reached zero until
    /// [`finish_release`](Self::finish_release). Returns their ids.
    pub fn prepare_release(&self) -> Vec<u64> {
        let already = self.released.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "super version {} released twice", self.version_number);
        debug_assert_eq!(self.refs(), 0);

        let mut to_delete = self.to_delete.lock();
        if self.mem.unref() {
            to_delete.push(Arc::clone(&self.mem));
        }
        self.imm.unref(&mut to_delete);
        to_delete.iter().map(|m| m.id()).collect()
    }

    /// Second half of teardown, engine lock released. Frees the parked
    /// memtables and returns their ids.
    pub fn finish_release(&self) -> Vec<u64> {
        let freed: Vec<Arc<MemTable>> = std::mem::take(&mut *self.to_delete.lock());
        freed.iter().map(|m| m.id()).collect()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SuperVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperVersion")
            .field("version_number", &self.version_number)
            .field("refs", &self.refs())
            .field("mem", &self.mem.id())
            .field("imm", &self.imm.len())
            .finish()
    }
}

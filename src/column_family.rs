//! Column Family Module
//!
//! Per column family state shared by the write path, readers and background
//! jobs.
//!
//! ## Responsibilities
//! - Own the active memtable, the immutable list and the on-disk version
//! - Publish them to readers as refcounted [`SuperVersion`]s
//! - Cache a super version reference per reader thread
//! - Recalculate the write stall condition after every install
//! - Track logical references so a dropped family is destroyed exactly once
//!
//! ## Thread-Local Super Version Cache
//! ```text
//!   slot: Empty | Cached(sv) | InUse | Stale
//!
//!   reader:    slot := InUse, got Cached(sv) and sv is current -> use sv
//!              otherwise ref the current sv under the engine lock
//!   return:    slot still InUse -> slot := Cached(sv)
//!              slot Stale       -> drop the reference (release if last)
//!   installer: every slot := Stale, dropping cached references
//! ```
//!
//! ## Locking
//! Methods documented as requiring the engine lock are called with it held.
//! `core` is always taken after the engine lock, and thread-local slots are
//! never held while acquiring either.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thread_local::ThreadLocal;
use tracing::{debug, info, warn};

use crate::comparator::Comparator;
use crate::engine::EngineInner;
use crate::error::{AtlasError, Result};
use crate::job_context::JobContext;
use crate::memtable::{MemTable, MemTableList, MemTableListVersion};
use crate::options::ColumnFamilyOptions;
use crate::super_version::SuperVersion;
use crate::version::{Compaction, CompactionPicker, LevelCompactionPicker, Version, VersionEdit};
use crate::write_controller::{WriteController, WriteStallToken};

pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Backpressure a column family currently applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStallCondition {
    Normal,
    Delayed,
    Stopped,
}

enum LocalSuperVersion {
    Empty,
    Cached(Arc<SuperVersion>),
    InUse,
    Stale,
}

struct CfCore {
    super_version: Arc<SuperVersion>,
    mem: Arc<MemTable>,
    imm: MemTableList,
    current: Arc<Version>,
    /// Earliest log that may hold unflushed data of this family
    log_number: u64,
    stall: Option<WriteStallToken>,
}

pub struct ColumnFamilyData {
    id: u32,
    name: String,
    options: Arc<ColumnFamilyOptions>,
    refs: AtomicI32,
    dropped: AtomicBool,
    destroyed: AtomicBool,
    pending_flush: AtomicBool,
    pending_compaction: AtomicBool,
    super_version_number: AtomicU64,
    local_sv: ThreadLocal<Mutex<LocalSuperVersion>>,
    write_controller: Arc<WriteController>,
    picker: Box<dyn CompactionPicker>,
    memtable_ids: Arc<AtomicU64>,
    core: Mutex<CfCore>,
}

impl ColumnFamilyData {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        options: ColumnFamilyOptions,
        log_number: u64,
        write_controller: Arc<WriteController>,
        memtable_ids: Arc<AtomicU64>,
    ) -> Arc<Self> {
        let options = Arc::new(options.sanitize());
        let mem = Arc::new(MemTable::new(
            memtable_ids.fetch_add(1, Ordering::Relaxed) + 1,
            options.write_buffer_size,
        ));
        mem.ref_();
        let imm = MemTableList::new(options.min_write_buffer_number_to_merge);
        let current = Arc::new(Version::new(options.num_levels, Arc::clone(&options.comparator)));
        let super_version = SuperVersion::new(
            Arc::clone(&mem),
            imm.current(),
            Arc::clone(&current),
            Arc::clone(&options),
            1,
        );

        Arc::new(Self {
            id,
            name: name.into(),
            options,
            refs: AtomicI32::new(0),
            dropped: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            pending_flush: AtomicBool::new(false),
            pending_compaction: AtomicBool::new(false),
            super_version_number: AtomicU64::new(1),
            local_sv: ThreadLocal::new(),
            write_controller,
            picker: Box::new(LevelCompactionPicker::new()),
            memtable_ids,
            core: Mutex::new(CfCore {
                super_version,
                mem,
                imm,
                current,
                log_number,
                stall: None,
            }),
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Arc<ColumnFamilyOptions> {
        &self.options
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.options.comparator
    }

    // =========================================================================
    // Reference Counting and Lifecycle
    // =========================================================================

    pub fn ref_(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; true for the caller that dropped the last. That
    /// caller must hold the engine lock and call [`destroy`](Self::destroy).
    pub fn unref(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "column family {} unref below zero", self.name);
        prev == 1
    }

    pub fn refs(&self) -> i32 {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn set_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Release everything this family holds. Engine lock required; runs at
    /// most once, after the last reference is gone.
    ///
    /// Super versions and memtables that reach zero are prepared here and
    /// handed to `job`, which frees them once the lock is released.
    pub fn destroy(&self, job: &mut JobContext) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug_assert_eq!(self.refs(), 0);

        job.superversions_to_free
            .extend(self.reset_thread_local_super_versions());
        let memtables_before = job.memtables_to_free.len();
        {
            let mut core = self.core.lock();
            if core.super_version.unref() {
                core.super_version.prepare_release();
                job.superversions_to_free.push(Arc::clone(&core.super_version));
            }
            if core.mem.unref() {
                job.memtables_to_free.push(Arc::clone(&core.mem));
            }
            core.imm.current().unref(&mut job.memtables_to_free);
            core.stall = None;
        }
        info!(
            cf = %self.name,
            id = self.id,
            memtables = job.memtables_to_free.len() - memtables_before,
            "column family destroyed"
        );
    }

    // =========================================================================
    // Scheduling Flags (engine lock held)
    // =========================================================================

    pub fn pending_flush(&self) -> bool {
        self.pending_flush.load(Ordering::Acquire)
    }

    pub(crate) fn set_pending_flush(&self, value: bool) {
        self.pending_flush.store(value, Ordering::Release);
    }

    pub fn pending_compaction(&self) -> bool {
        self.pending_compaction.load(Ordering::Acquire)
    }

    pub(crate) fn set_pending_compaction(&self, value: bool) {
        self.pending_compaction.store(value, Ordering::Release);
    }

    // =========================================================================
    // Memtables and Versions (engine lock held)
    // =========================================================================

    pub fn mem(&self) -> Arc<MemTable> {
        Arc::clone(&self.core.lock().mem)
    }

    pub fn imm(&self) -> Arc<MemTableListVersion> {
        self.core.lock().imm.current()
    }

    pub fn imm_num_not_flushed(&self) -> usize {
        self.core.lock().imm.num_not_flushed()
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.core.lock().current)
    }

    pub fn log_number(&self) -> u64 {
        self.core.lock().log_number
    }

    /// Advance the earliest needed log; never moves backwards.
    pub fn set_log_number(&self, number: u64) {
        let mut core = self.core.lock();
        core.log_number = core.log_number.max(number);
    }

    /// Nothing buffered in memory for this family
    pub fn is_memory_empty(&self) -> bool {
        let core = self.core.lock();
        core.mem.is_empty() && core.imm.num_not_flushed() == 0
    }

    pub fn construct_new_memtable(&self) -> Arc<MemTable> {
        let id = self.memtable_ids.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(MemTable::new(id, self.options.write_buffer_size))
    }

    /// Retire the active memtable into the immutable list and make
    /// `new_mem` active. `next_log_number` is the log new writes go to.
    pub fn switch_memtable(&self, new_mem: Arc<MemTable>, next_log_number: u64, to_delete: &mut Vec<Arc<MemTable>>) {
        let mut core = self.core.lock();
        new_mem.ref_();
        let old = std::mem::replace(&mut core.mem, new_mem);
        old.set_next_log_number(next_log_number);
        core.imm.add(Arc::clone(&old), to_delete);
        if old.unref() {
            to_delete.push(old);
        }
    }

    pub fn request_flush(&self) {
        self.core.lock().imm.flush_requested();
    }

    pub fn is_flush_pending(&self) -> bool {
        self.core.lock().imm.is_flush_pending()
    }

    pub fn pick_memtables_to_flush(&self) -> Vec<Arc<MemTable>> {
        self.core.lock().imm.pick_memtables_to_flush()
    }

    pub fn rollback_memtable_flush(&self, mems: &[Arc<MemTable>]) {
        self.core.lock().imm.rollback_memtable_flush(mems);
    }

    /// Install a finished flush. Retired memtables (possibly including ones
    /// of earlier flushes that finished first) become level-0 files in a new
    /// version. Returns the number of memtables retired.
    pub fn install_memtable_flush_results(
        &self,
        mems: &[Arc<MemTable>],
        output: Option<Arc<crate::version::FileMetaData>>,
        to_delete: &mut Vec<Arc<MemTable>>,
    ) -> usize {
        let mut core = self.core.lock();
        let removed = core.imm.install_memtable_flush_results(mems, output, to_delete);
        if removed.is_empty() {
            return 0;
        }

        let mut edit = VersionEdit::default();
        let mut seen = HashSet::new();
        for mem in &removed {
            if let Some(file) = mem.flush_output() {
                if seen.insert(file.number) {
                    edit.add_file(0, file);
                }
            }
        }
        let log_number = removed.iter().map(|m| m.next_log_number()).max().unwrap_or(0);
        edit.set_log_number(log_number);
        Self::apply_edit_locked(&mut core, &edit);
        debug!(cf = %self.name, retired = removed.len(), files = edit.new_files.len(), log_number, "flush installed");
        removed.len()
    }

    /// Apply a compaction (or any other) edit to the current version.
    pub fn apply_edit(&self, edit: &VersionEdit) {
        let mut core = self.core.lock();
        Self::apply_edit_locked(&mut core, edit);
    }

    fn apply_edit_locked(core: &mut CfCore, edit: &VersionEdit) {
        core.current = Arc::new(core.current.apply(edit));
        if let Some(log_number) = edit.log_number {
            core.log_number = core.log_number.max(log_number);
        }
    }

    // =========================================================================
    // Compaction (engine lock held)
    // =========================================================================

    pub fn needs_compaction(&self) -> bool {
        if self.options.disable_auto_compactions {
            return false;
        }
        let current = self.current();
        self.picker.needs_compaction(&current, &self.options)
    }

    pub fn pick_compaction(&self) -> Option<Compaction> {
        let current = self.current();
        self.picker.pick_compaction(&current, &self.options)
    }

    pub fn compact_range(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<Option<Compaction>> {
        let current = self.current();
        self.picker.compact_range(&current, level, begin, end)
    }

    pub fn release_compaction(&self, compaction: &Compaction) {
        self.picker.release_compaction(compaction);
    }

    // =========================================================================
    // Super Version Exchange
    // =========================================================================

    pub fn super_version_number(&self) -> u64 {
        self.super_version_number.load(Ordering::Acquire)
    }

    /// The installed super version, with a new reference for the caller.
    pub fn get_referenced_super_version<T>(&self, db_mutex: &Mutex<T>) -> Arc<SuperVersion> {
        let _guard = db_mutex.lock();
        let core = self.core.lock();
        core.super_version.ref_();
        Arc::clone(&core.super_version)
    }

    /// Publish a super version built from the current memtables and version.
    ///
    /// Engine lock required. Every thread-local cache is marked stale and the
    /// write stall condition is recalculated. Returns the replaced super
    /// version if this dropped its last reference; it has been
    /// `prepare_release`d and the caller must `finish_release` it after
    /// releasing the engine lock.
    pub fn install_super_version(&self) -> Option<Arc<SuperVersion>> {
        let (old, stray) = {
            let mut core = self.core.lock();
            let number = self.super_version_number.fetch_add(1, Ordering::AcqRel) + 1;
            let new_sv = SuperVersion::new(
                Arc::clone(&core.mem),
                core.imm.current(),
                Arc::clone(&core.current),
                Arc::clone(&self.options),
                number,
            );
            let old = std::mem::replace(&mut core.super_version, new_sv);
            let stray = self.reset_thread_local_super_versions();
            self.recalculate_write_stall_conditions(&mut core);
            (old, stray)
        };

        // Cached references only ever point at the super version being
        // replaced, which the family itself still held during the reset.
        for sv in stray {
            sv.finish_release();
        }

        if old.unref() {
            old.prepare_release();
            Some(old)
        } else {
            None
        }
    }

    /// Mark every thread-local slot stale and drop the references they
    /// cached. Returns super versions that reached zero, already
    /// `prepare_release`d.
    pub fn reset_thread_local_super_versions(&self) -> Vec<Arc<SuperVersion>> {
        let mut reached_zero = Vec::new();
        for slot in self.local_sv.iter() {
            let previous = std::mem::replace(&mut *slot.lock(), LocalSuperVersion::Stale);
            if let LocalSuperVersion::Cached(sv) = previous {
                if sv.unref() {
                    sv.prepare_release();
                    reached_zero.push(sv);
                }
            }
        }
        reached_zero
    }

    /// Super version for a read on this thread.
    ///
    /// The fast path reuses the thread's cached reference without touching
    /// any refcount. The slot reads `InUse` until the super version is
    /// handed back through
    /// [`return_thread_local_super_version`](Self::return_thread_local_super_version).
    pub fn get_thread_local_super_version<T>(&self, db_mutex: &Mutex<T>) -> Arc<SuperVersion> {
        let slot = self.local_sv.get_or(|| Mutex::new(LocalSuperVersion::Empty));
        let previous = std::mem::replace(&mut *slot.lock(), LocalSuperVersion::InUse);

        let outdated = match previous {
            LocalSuperVersion::Cached(sv) if sv.version_number == self.super_version_number() => return sv,
            LocalSuperVersion::Cached(sv) => Some(sv),
            LocalSuperVersion::Empty | LocalSuperVersion::InUse | LocalSuperVersion::Stale => None,
        };

        let mut released = None;
        let sv = {
            let _guard = db_mutex.lock();
            if let Some(old) = outdated {
                if old.unref() {
                    old.prepare_release();
                    released = Some(old);
                }
            }
            let core = self.core.lock();
            core.super_version.ref_();
            Arc::clone(&core.super_version)
        };
        if let Some(old) = released {
            old.finish_release();
        }
        sv
    }

    /// Hand a super version obtained from
    /// [`get_thread_local_super_version`](Self::get_thread_local_super_version)
    /// back. Returns true if it went back into the cache; otherwise the
    /// reference was dropped, releasing the super version if it was the last.
    pub fn return_thread_local_super_version<T>(&self, sv: Arc<SuperVersion>, db_mutex: &Mutex<T>) -> bool {
        let slot = self.local_sv.get_or(|| Mutex::new(LocalSuperVersion::Empty));
        {
            let mut cached = slot.lock();
            if matches!(*cached, LocalSuperVersion::InUse) {
                *cached = LocalSuperVersion::Cached(sv);
                return true;
            }
        }

        if sv.unref() {
            {
                let _guard = db_mutex.lock();
                sv.prepare_release();
            }
            sv.finish_release();
        }
        false
    }

    // =========================================================================
    // Write Stall
    // =========================================================================

    /// Lift whatever stall this family imposes. Used once it is dropped.
    pub(crate) fn release_write_stall(&self) {
        self.core.lock().stall = None;
    }

    pub fn write_stall_condition(&self) -> WriteStallCondition {
        Self::condition_of(&self.core.lock())
    }

    fn condition_of(core: &CfCore) -> WriteStallCondition {
        match &core.stall {
            None => WriteStallCondition::Normal,
            Some(token) if token.is_stop() => WriteStallCondition::Stopped,
            Some(_) => WriteStallCondition::Delayed,
        }
    }

    fn recalculate_write_stall_conditions(&self, core: &mut CfCore) {
        let imm_count = core.imm.num_not_flushed();
        let l0_files = core.current.num_level_files(0);
        let options = &self.options;

        let desired = if self.is_dropped() {
            WriteStallCondition::Normal
        } else if imm_count >= options.max_write_buffer_number {
            WriteStallCondition::Stopped
        } else if l0_files >= options.level0_stop_writes_trigger {
            WriteStallCondition::Stopped
        } else if l0_files >= options.level0_slowdown_writes_trigger {
            WriteStallCondition::Delayed
        } else {
            WriteStallCondition::Normal
        };
        if desired == Self::condition_of(core) {
            return;
        }

        core.stall = match desired {
            WriteStallCondition::Stopped => {
                warn!(cf = %self.name, imm_count, l0_files, "stopping writes");
                Some(WriteStallToken::Stop(self.write_controller.get_stop_token()))
            }
            WriteStallCondition::Delayed => {
                warn!(cf = %self.name, l0_files, rate = self.write_controller.delayed_write_rate(), "delaying writes");
                Some(WriteStallToken::Delay(self.write_controller.get_delay_token()))
            }
            WriteStallCondition::Normal => {
                info!(cf = %self.name, imm_count, l0_files, "write stall cleared");
                None
            }
        };
    }
}

impl std::fmt::Debug for ColumnFamilyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("refs", &self.refs())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

// =============================================================================
// Column Family Set
// =============================================================================

/// Registry of column families. Guarded by the engine lock.
///
/// The set holds one reference on every live family. Dropping a family
/// removes its name and that reference; the family stays reachable by id
/// until its last reference is gone and it has been destroyed.
pub struct ColumnFamilySet {
    by_name: HashMap<String, u32>,
    by_id: BTreeMap<u32, Arc<ColumnFamilyData>>,
    next_id: u32,
    write_controller: Arc<WriteController>,
    memtable_ids: Arc<AtomicU64>,
}

impl ColumnFamilySet {
    pub fn new(write_controller: Arc<WriteController>) -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: 0,
            write_controller,
            memtable_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn create_column_family(
        &mut self,
        name: &str,
        options: ColumnFamilyOptions,
        log_number: u64,
    ) -> Result<Arc<ColumnFamilyData>> {
        if self.by_name.contains_key(name) {
            return Err(AtlasError::InvalidArgument(format!("column family {name} already exists")));
        }
        let id = self.next_id;
        self.next_id += 1;
        let cfd = ColumnFamilyData::new(
            id,
            name,
            options,
            log_number,
            Arc::clone(&self.write_controller),
            Arc::clone(&self.memtable_ids),
        );
        cfd.ref_();
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, Arc::clone(&cfd));
        info!(cf = name, id, log_number, "column family created");
        Ok(cfd)
    }

    /// Registered family by id, dropped ones included until destroyed
    pub fn get(&self, id: u32) -> Option<Arc<ColumnFamilyData>> {
        self.by_id.get(&id).filter(|cfd| !cfd.is_destroyed()).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<ColumnFamilyData>> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn default_column_family(&self) -> Option<Arc<ColumnFamilyData>> {
        self.get(0)
    }

    /// Families that have not been dropped, by id
    pub fn alive(&self) -> impl Iterator<Item = &Arc<ColumnFamilyData>> {
        self.by_id.values().filter(|cfd| !cfd.is_dropped())
    }

    /// Every family not yet destroyed, dropped ones included
    pub fn registered(&self) -> impl Iterator<Item = &Arc<ColumnFamilyData>> {
        self.by_id.values().filter(|cfd| !cfd.is_destroyed())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn drop_column_family(&mut self, cfd: &Arc<ColumnFamilyData>, job: &mut JobContext) {
        cfd.set_dropped();
        cfd.release_write_stall();
        self.by_name.remove(cfd.name());
        info!(cf = %cfd.name(), id = cfd.id(), "column family dropped");
        if cfd.unref() {
            cfd.destroy(job);
        }
        self.free_dead_column_families(job);
    }

    /// Unlink destroyed families, moving them into `job` so their memory is
    /// freed outside the engine lock. Returns how many were removed.
    pub fn free_dead_column_families(&mut self, job: &mut JobContext) -> usize {
        let before = job.column_families_to_free.len();
        self.by_id.retain(|_, cfd| {
            if cfd.is_destroyed() {
                job.column_families_to_free.push(Arc::clone(cfd));
                return false;
            }
            true
        });
        job.column_families_to_free.len() - before
    }
}

// =============================================================================
// Memtable Targets for Inserts
// =============================================================================

/// Where records for one column family go
pub struct MemTableTarget {
    pub cfd: Arc<ColumnFamilyData>,
    pub mem: Arc<MemTable>,
    pub log_number: u64,
}

/// Active memtable of every registered family, collected under the engine
/// lock by the group leader. The memtables cannot be switched while the
/// leader applies its group, since switching also requires leadership.
#[derive(Default)]
pub struct ColumnFamilyMemTables {
    targets: HashMap<u32, MemTableTarget>,
}

impl ColumnFamilyMemTables {
    pub fn from_set(set: &ColumnFamilySet) -> Self {
        let mut tables = Self::default();
        for cfd in set.registered() {
            tables.insert(cfd);
        }
        tables
    }

    pub fn insert(&mut self, cfd: &Arc<ColumnFamilyData>) {
        self.targets.insert(
            cfd.id(),
            MemTableTarget {
                cfd: Arc::clone(cfd),
                mem: cfd.mem(),
                log_number: cfd.log_number(),
            },
        );
    }

    pub fn get(&self, id: u32) -> Option<&MemTableTarget> {
        self.targets.get(&id)
    }
}

// =============================================================================
// Handles
// =============================================================================

/// User-facing reference to a column family.
///
/// Each handle holds one reference. Dropping the last handle of a dropped
/// family destroys it.
pub struct ColumnFamilyHandle {
    cfd: Arc<ColumnFamilyData>,
    owner: Arc<EngineInner>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(cfd: Arc<ColumnFamilyData>, owner: Arc<EngineInner>) -> Self {
        cfd.ref_();
        Self { cfd, owner }
    }

    pub fn id(&self) -> u32 {
        self.cfd.id()
    }

    pub fn name(&self) -> &str {
        self.cfd.name()
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        self.cfd.user_comparator()
    }

    pub fn is_dropped(&self) -> bool {
        self.cfd.is_dropped()
    }

    pub fn data(&self) -> &Arc<ColumnFamilyData> {
        &self.cfd
    }
}

impl Clone for ColumnFamilyHandle {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.cfd), Arc::clone(&self.owner))
    }
}

impl Drop for ColumnFamilyHandle {
    fn drop(&mut self) {
        let mut job = JobContext::new(self.owner.next_job_id());
        {
            let mut state = self.owner.mutex.lock();
            if self.cfd.unref() {
                self.cfd.destroy(&mut job);
                state.column_families.free_dead_column_families(&mut job);
            }
        }
        self.owner.clean_job(&mut job);
    }
}

impl std::fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

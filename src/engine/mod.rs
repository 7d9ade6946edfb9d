//! Engine Module
//!
//! The public face of the write path. Coordinates group commit, column
//! families, backpressure and background work.
//!
//! ## Responsibilities
//! - Commit writes through the group-commit queue
//! - Serve point reads from per-thread cached super versions
//! - Create and drop column families without racing in-flight writes
//! - Switch, flush and compact memtables through background pools
//! - Stop all writes once a background error is recorded
//!
//! ## Locking
//! ```text
//!   write thread leadership  ──>  engine lock (DbState)  ──>  column family core
//!                                        │
//!                                        └──> log writer
//! ```
//! Memtable inserts, log appends and table I/O run with the engine lock
//! released. Anything that must be freed afterwards travels in a
//! [`JobContext`].

mod jobs;
mod state;
mod write;

pub use state::EngineStats;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::background::{BackgroundError, BackgroundPool};
use crate::clock::{Clock, SystemClock};
use crate::column_family::{ColumnFamilyHandle, ColumnFamilyMemTables, ColumnFamilySet, DEFAULT_COLUMN_FAMILY_NAME};
use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::flush_scheduler::FlushScheduler;
use crate::job_context::JobContext;
use crate::lookup::GetContext;
use crate::options::{ColumnFamilyOptions, FlushOptions, ReadOptions, WriteOptions};
use crate::snapshot::Snapshot;
use crate::super_version::SuperVersion;
use crate::table_store::{InMemoryTableStore, TableStore};
use crate::types::{InternalEntry, SequenceNumber};
use crate::wal::{self, LogWriter};
use crate::write_batch::{insert_into, WriteBatch};
use crate::write_controller::WriteController;
use crate::write_thread::{WriteThread, Writer};

use state::{DbState, StatsCounters};

/// How long a waiter sleeps on the background condvar before rechecking
const BG_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Check run by a write before it is committed.
///
/// A failing callback aborts only its own write. Writes with a callback are
/// never grouped with other writers.
pub trait WriteCallback {
    fn callback(&self, engine: &Engine) -> Result<()>;
}

impl<F> WriteCallback for F
where
    F: Fn(&Engine) -> Result<()>,
{
    fn callback(&self, engine: &Engine) -> Result<()> {
        self(engine)
    }
}

/// Shared engine state, owned jointly by the engine, its handles and
/// running background jobs.
pub(crate) struct EngineInner {
    pub config: Config,
    pub mutex: Mutex<DbState>,
    /// Signalled when background work finishes or writes may resume
    pub bg_cv: Condvar,
    pub write_thread: WriteThread,
    pub write_controller: Arc<WriteController>,
    pub flush_scheduler: FlushScheduler,
    pub bg_error: BackgroundError,
    pub shutting_down: AtomicBool,
    pub closed: AtomicBool,
    /// Last sequence visible to readers
    pub last_sequence: AtomicU64,
    pub clock: Arc<dyn Clock>,
    pub table_store: Arc<dyn TableStore>,
    pub log: Mutex<Box<dyn LogWriter>>,
    pub flush_pool: BackgroundPool,
    pub compaction_pool: BackgroundPool,
    pub job_ids: AtomicU64,
    pub stats: StatsCounters,
}

impl EngineInner {
    pub fn next_job_id(&self) -> u64 {
        self.job_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn clean_job(&self, job: &mut JobContext) -> Vec<u64> {
        job.clean(self.table_store.as_ref(), self.config.wal_dir.as_deref())
    }

    /// Look `key` up through `sv` at `snapshot`.
    fn lookup(&self, sv: &SuperVersion, key: &[u8], snapshot: SequenceNumber) -> Result<Option<Vec<u8>>> {
        let mut ctx = GetContext::new(key, snapshot, sv.options.merge_operator.as_deref());
        if !sv.mem.get(&mut ctx) && !sv.imm.get(&mut ctx) {
            sv.current.get(&mut ctx, self.table_store.as_ref())?;
        }
        ctx.finish()
    }
}

/// A multi-column-family key-value engine
///
/// ## Concurrency Model
///
/// - **Writes** queue in the write thread. The first writer in line leads a
///   group: it logs and inserts the batches of compatible followers along
///   with its own, then wakes them with the shared result.
/// - **Reads** take no lock on the fast path. Each thread caches a
///   reference to its column family's current super version and only
///   refreshes it after a memtable switch, flush or compaction.
/// - **Background work** (flushes and compactions) runs on fixed pools and
///   installs its results under the engine lock.
pub struct Engine {
    inner: Arc<EngineInner>,
    default_cf: ColumnFamilyHandle,
}

impl Engine {
    /// Open an engine with a system clock and in-memory table store.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock::new()), Arc::new(InMemoryTableStore::new()))
    }

    /// Open an engine
    ///
    /// On startup:
    /// 1. Sanitize the configuration
    /// 2. Create the log directory and open the first log
    /// 3. Create the default column family
    /// 4. Start the background pools
    pub fn open_with(config: Config, clock: Arc<dyn Clock>, table_store: Arc<dyn TableStore>) -> Result<Self> {
        // Step 1: Sanitize
        let config = config.sanitize();
        let write_controller = Arc::new(WriteController::new(config.delayed_write_rate));

        // Step 2: First log
        if let Some(dir) = &config.wal_dir {
            std::fs::create_dir_all(dir)?;
        }
        let mut state = DbState::new(ColumnFamilySet::new(Arc::clone(&write_controller)));
        let logfile_number = state.new_file_number();
        let log = wal::open_log(config.wal_dir.as_deref(), logfile_number)?;
        state.logfile_number = logfile_number;
        state.alive_logs.push_back(logfile_number);

        // Step 3: Default column family
        let default_cfd = state.column_families.create_column_family(
            DEFAULT_COLUMN_FAMILY_NAME,
            config.default_cf_options.clone(),
            logfile_number,
        )?;

        // Step 4: Background pools
        let flush_pool = BackgroundPool::new("flush", config.max_background_flushes)?;
        let compaction_pool = BackgroundPool::new("compaction", config.max_background_compactions)?;

        info!(
            wal_dir = ?config.wal_dir,
            flushes = config.max_background_flushes,
            compactions = config.max_background_compactions,
            "engine opened"
        );

        let inner = Arc::new(EngineInner {
            config,
            mutex: Mutex::new(state),
            bg_cv: Condvar::new(),
            write_thread: WriteThread::new(),
            write_controller,
            flush_scheduler: FlushScheduler::new(),
            bg_error: BackgroundError::new(),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_sequence: AtomicU64::new(0),
            clock,
            table_store,
            log: Mutex::new(log),
            flush_pool,
            compaction_pool,
            job_ids: AtomicU64::new(0),
            stats: StatsCounters::default(),
        });
        let default_cf = ColumnFamilyHandle::new(default_cfd, Arc::clone(&inner));
        Ok(Self { inner, default_cf })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_cf(&WriteOptions::default(), &self.default_cf, key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_cf(&WriteOptions::default(), &self.default_cf, key)
    }

    pub fn merge(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.merge_cf(&WriteOptions::default(), &self.default_cf, key, value)
    }

    pub fn put_cf(&self, options: &WriteOptions, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.id(), key, value);
        self.write(options, batch)
    }

    pub fn delete_cf(&self, options: &WriteOptions, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.id(), key);
        self.write(options, batch)
    }

    pub fn merge_cf(&self, options: &WriteOptions, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        if cf.data().options().merge_operator.is_none() {
            return Err(AtlasError::NotSupported(format!(
                "column family {} has no merge operator",
                cf.name()
            )));
        }
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf.id(), key, value);
        self.write(options, batch)
    }

    /// Apply `batch` atomically
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.write_impl(options, batch, None)
    }

    /// Apply `batch` atomically if `callback` succeeds right before commit.
    pub fn write_with_callback(
        &self,
        options: &WriteOptions,
        batch: WriteBatch,
        callback: &dyn WriteCallback,
    ) -> Result<()> {
        self.write_impl(options, batch, Some(callback))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_cf(&ReadOptions::default(), &self.default_cf, key)
    }

    /// Get the value of `key` in `cf`
    ///
    /// Reads the latest committed state unless `options.snapshot` pins an
    /// earlier sequence.
    pub fn get_cf(&self, options: &ReadOptions, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cfd = cf.data();
        let sv = cfd.get_thread_local_super_version(&self.inner.mutex);
        let snapshot = options
            .snapshot
            .unwrap_or_else(|| self.inner.last_sequence.load(Ordering::Acquire));
        let result = self.inner.lookup(&sv, key, snapshot);
        cfd.return_thread_local_super_version(sv, &self.inner.mutex);
        result
    }

    /// Pin the current sequence number for repeatable reads
    pub fn get_snapshot(&self) -> Snapshot {
        let mut state = self.inner.mutex.lock();
        let sequence = self.inner.last_sequence.load(Ordering::Acquire);
        state.snapshots.insert(sequence);
        Snapshot::new(sequence, Arc::clone(&self.inner))
    }

    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.inner.last_sequence.load(Ordering::Acquire)
    }

    // =========================================================================
    // Column Families
    // =========================================================================

    pub fn default_column_family(&self) -> &ColumnFamilyHandle {
        &self.default_cf
    }

    /// Handle to a live column family by name
    pub fn column_family(&self, name: &str) -> Option<ColumnFamilyHandle> {
        let state = self.inner.mutex.lock();
        let cfd = state.column_families.get_by_name(name)?;
        Some(ColumnFamilyHandle::new(cfd, Arc::clone(&self.inner)))
    }

    pub fn create_column_family(&self, name: &str, options: ColumnFamilyOptions) -> Result<ColumnFamilyHandle> {
        let mut state = self.inner.mutex.lock();
        let writer = Writer::new(None, false, false, false);
        self.inner.write_thread.enter_unbatched(&writer, &mut state);

        let log_number = state.logfile_number;
        let created = state.column_families.create_column_family(name, options, log_number);

        self.inner.write_thread.exit_unbatched(&writer);
        let cfd = created?;
        Ok(ColumnFamilyHandle::new(cfd, Arc::clone(&self.inner)))
    }

    /// Drop `cf`. Its data stays readable through existing handles; the
    /// family is destroyed when the last one goes away.
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        if cf.id() == 0 {
            return Err(AtlasError::InvalidArgument(
                "cannot drop the default column family".to_string(),
            ));
        }

        let mut job = JobContext::new(self.inner.next_job_id());
        let result = {
            let mut state = self.inner.mutex.lock();
            let writer = Writer::new(None, false, false, false);
            self.inner.write_thread.enter_unbatched(&writer, &mut state);

            let result = if cf.is_dropped() {
                Err(AtlasError::InvalidArgument(format!("column family {} already dropped", cf.name())))
            } else {
                let cfd = cf.data();
                let current = cfd.current();
                for level in 0..current.num_levels() {
                    state.obsolete_candidates.extend(current.files(level).iter().cloned());
                }
                drop(current);
                state.column_families.drop_column_family(cfd, &mut job);
                Ok(())
            };

            self.inner.write_thread.exit_unbatched(&writer);
            self.inner.find_obsolete_files(&mut state, &mut job);
            self.inner.bg_cv.notify_all();
            result
        };
        self.inner.clean_job(&mut job);
        result
    }

    // =========================================================================
    // Flush and Compaction
    // =========================================================================

    /// Switch the active memtable of `cf` and flush everything buffered.
    pub fn flush(&self, options: &FlushOptions, cf: &ColumnFamilyHandle) -> Result<()> {
        let inner = &self.inner;
        let cfd = Arc::clone(cf.data());
        let mut job = JobContext::new(inner.next_job_id());
        let result = {
            let mut state = inner.mutex.lock();
            inner.bg_error.check()?;

            let writer = Writer::new(None, false, false, false);
            inner.write_thread.enter_unbatched(&writer, &mut state);

            let mut result = Ok(());
            if !cfd.mem().is_empty() {
                result = inner.switch_memtable(&mut state, &cfd, &mut job);
            }
            if result.is_ok() {
                cfd.request_flush();
                inner.schedule_pending_flush(&mut state, &cfd);
                inner.maybe_schedule_flush_or_compaction(&mut state);
            }
            inner.write_thread.exit_unbatched(&writer);

            if result.is_ok() && options.wait {
                result = inner.wait_for_flush(&mut state, &cfd);
            }
            result
        };
        inner.clean_job(&mut job);
        result
    }

    /// Compact every file of `cf` overlapping `[begin, end]` down the levels.
    /// Buffered data is flushed first. Fails with `Busy` if an automatic
    /// compaction holds any of the files.
    pub fn compact_range(&self, cf: &ColumnFamilyHandle, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.flush(&FlushOptions::default(), cf)?;

        let inner = &self.inner;
        let cfd = Arc::clone(cf.data());
        let mut job = JobContext::new(inner.next_job_id());
        let result = {
            let mut state = inner.mutex.lock();
            let mut result = Ok(());
            let num_levels = cfd.options().num_levels;
            for level in 0..num_levels - 1 {
                if let Err(e) = inner.bg_error.check() {
                    result = Err(e);
                    break;
                }
                if cfd.current().overlapping_inputs(level, begin, end).is_empty() {
                    continue;
                }
                match cfd.compact_range(level, begin, end) {
                    Ok(Some(compaction)) => {
                        if let Err(e) = inner.run_compaction(&mut state, &cfd, compaction, &mut job) {
                            inner.bg_error.set_if_unset(&e);
                            result = Err(e);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            inner.find_obsolete_files(&mut state, &mut job);
            inner.maybe_schedule_flush_or_compaction(&mut state);
            inner.bg_cv.notify_all();
            result
        };
        inner.clean_job(&mut job);
        debug!(cf = %cf.name(), ok = result.is_ok(), "manual compaction finished");
        result
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Apply one encoded batch read back from log `log_number`.
    ///
    /// Records for unknown column families, or for families whose data
    /// from that log was already flushed, are skipped. Nothing is written
    /// to the current log.
    pub fn replay(&self, record: &[u8], log_number: u64) -> Result<()> {
        let batch = WriteBatch::from_bytes(record)?;
        let inner = &self.inner;
        let mut job = JobContext::new(inner.next_job_id());
        let result = {
            let mut state = inner.mutex.lock();
            let writer = Writer::new(None, false, false, false);
            inner.write_thread.enter_unbatched(&writer, &mut state);

            let cf_mems = ColumnFamilyMemTables::from_set(&state.column_families);
            let mut result = insert_into(&batch, &cf_mems, Some(&inner.flush_scheduler), true, log_number);
            if result.is_ok() && batch.count() > 0 {
                let last = batch.sequence() + u64::from(batch.count()) - 1;
                inner.last_sequence.fetch_max(last, Ordering::AcqRel);
            }
            if result.is_ok() && !inner.flush_scheduler.is_empty() {
                result = inner.schedule_flushes(&mut state, &mut job);
            }

            inner.write_thread.exit_unbatched(&writer);
            result
        };
        inner.clean_job(&mut job);
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    /// The sticky background error, if one was recorded
    pub fn background_error(&self) -> Option<AtlasError> {
        self.inner.bg_error.get()
    }

    pub fn write_controller(&self) -> &Arc<WriteController> {
        &self.inner.write_controller
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current log file number
    pub fn logfile_number(&self) -> u64 {
        self.inner.mutex.lock().logfile_number
    }

    /// Logs not yet deleted, oldest first
    pub fn alive_log_numbers(&self) -> Vec<u64> {
        self.inner.mutex.lock().alive_logs.iter().copied().collect()
    }

    pub fn num_immutable_memtables(&self, cf: &ColumnFamilyHandle) -> usize {
        cf.data().imm_num_not_flushed()
    }

    pub fn num_level_files(&self, cf: &ColumnFamilyHandle, level: usize) -> usize {
        cf.data().current().num_level_files(level)
    }

    /// Entries of the active memtable of `cf`
    pub fn memtable_entries(&self, cf: &ColumnFamilyHandle) -> Vec<InternalEntry> {
        cf.data().mem().entries()
    }

    /// Block until no flush or compaction is queued or running.
    pub fn wait_for_background_work(&self) -> Result<()> {
        let mut state = self.inner.mutex.lock();
        loop {
            self.inner.bg_error.check()?;
            let idle = state.unscheduled_flushes == 0
                && state.unscheduled_compactions == 0
                && state.bg_flush_scheduled == 0
                && state.bg_compaction_scheduled == 0;
            if idle || self.inner.shutting_down.load(Ordering::Acquire) {
                return Ok(());
            }
            self.inner.bg_cv.wait_for(&mut state, BG_WAIT_INTERVAL);
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop background work and sync the log. Idempotent.
    ///
    /// Data still in memtables is not flushed; it is recoverable from the
    /// log when one is configured.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.shutting_down.store(true, Ordering::Release);
        {
            let _state = inner.mutex.lock();
            inner.bg_cv.notify_all();
        }

        inner.flush_pool.shutdown();
        inner.compaction_pool.shutdown();

        let mut job = JobContext::new(inner.next_job_id());
        {
            let mut guard = inner.mutex.lock();
            let state = &mut *guard;
            inner.flush_scheduler.clear(&mut job);
            let queued: Vec<_> = state.flush_queue.drain(..).chain(state.compaction_queue.drain(..)).collect();
            for cfd in queued {
                cfd.set_pending_flush(false);
                cfd.set_pending_compaction(false);
                if cfd.unref() {
                    cfd.destroy(&mut job);
                }
            }
            state.unscheduled_flushes = 0;
            state.unscheduled_compactions = 0;
            state.column_families.free_dead_column_families(&mut job);
        }
        inner.clean_job(&mut job);

        inner.log.lock().sync()?;
        info!(last_sequence = inner.last_sequence.load(Ordering::Acquire), "engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing engine");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("last_sequence", &self.latest_sequence_number())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

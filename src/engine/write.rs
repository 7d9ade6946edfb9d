//! Group commit write path.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, info, warn};

use crate::column_family::{ColumnFamilyData, ColumnFamilyMemTables};
use crate::error::{AtlasError, Result};
use crate::job_context::JobContext;
use crate::options::WriteOptions;
use crate::types::SequenceNumber;
use crate::wal;
use crate::write_batch::{validate_batch, MemTableInserter, WriteBatch};
use crate::write_thread::{JoinOutcome, WriteGroup, Writer};

use super::state::{DbState, StatsCounters};
use super::{Engine, EngineInner, WriteCallback, BG_WAIT_INTERVAL};

/// What happened while a group was applied without the engine lock
struct GroupOutcome {
    status: Result<()>,
    /// Records in the merged batch
    count: u64,
    wal_written: bool,
    /// Memtable insertion started, so the group's sequence numbers are used
    inserted: bool,
}

impl Engine {
    /// Commit `batch` through the write thread
    ///
    /// Steps:
    /// 1. Queue as a writer; return if another leader wrote the batch
    /// 2. Run the callback, if any
    /// 3. Under the engine lock: check the background error, switch full
    ///    memtables, wait out write stalls, form the group
    /// 4. Without the lock: log the merged group and insert it
    /// 5. Publish the group's sequence numbers and wake the followers
    pub(crate) fn write_impl(
        &self,
        options: &WriteOptions,
        batch: WriteBatch,
        callback: Option<&dyn WriteCallback>,
    ) -> Result<()> {
        let inner = &self.inner;

        // Step 1: Queue up
        let writer = Writer::new(Some(batch), options.sync, options.disable_wal, callback.is_some());
        if inner.write_thread.join_batch_group(&writer) == JoinOutcome::Completed {
            StatsCounters::add(&inner.stats.writes_done_by_other, 1);
            return writer.status();
        }

        // Step 2: Callback, run before anything is committed
        let mut status = match callback {
            Some(callback) => callback.callback(self),
            None => Ok(()),
        };
        let callback_failed = status.is_err();

        let mut job = JobContext::new(inner.next_job_id());
        let mut state = inner.mutex.lock();

        // Step 3: Admission
        if status.is_ok() {
            status = inner.preprocess_write(&mut state, options, &mut job);
        }
        let group = inner.write_thread.enter_as_batch_group_leader(&writer);

        if status.is_ok() {
            state.last_batch_group_size = group.size();
            let cf_mems = ColumnFamilyMemTables::from_set(&state.column_families);
            let last_sequence = inner.last_sequence.load(Ordering::Acquire);

            // Step 4: Log and insert without the lock
            let outcome = MutexGuard::unlocked(&mut state, || {
                inner.write_group(&group, &cf_mems, last_sequence, options.ignore_missing_column_families)
            });

            // Step 5: Publish
            if outcome.inserted {
                inner.last_sequence.store(last_sequence + outcome.count, Ordering::Release);
            }
            if outcome.wal_written {
                state.log_empty = false;
            }
            status = outcome.status;

            StatsCounters::add(&inner.stats.write_groups, 1);
            if outcome.inserted {
                StatsCounters::add(&inner.stats.keys_written, outcome.count);
            }
            StatsCounters::add(&inner.stats.bytes_written, group.size() as u64);
        }

        if let Err(e) = &status {
            if inner.config.paranoid_checks && !callback_failed && poisons_write_path(e) {
                inner.bg_error.set_if_unset(e);
                inner.bg_cv.notify_all();
            }
        }
        drop(state);

        inner.write_thread.exit_as_batch_group_leader(&group, &status);
        StatsCounters::add(&inner.stats.writes_done_by_self, 1);
        inner.clean_job(&mut job);
        status
    }
}

/// Whether a failed group write should stop all later writes. Rejections
/// caused by the caller's own batch do not.
fn poisons_write_path(err: &AtlasError) -> bool {
    !err.is_transient() && !matches!(err, AtlasError::InvalidArgument(_) | AtlasError::NotSupported(_))
}

impl EngineInner {
    /// Everything a leader does under the engine lock before writing.
    fn preprocess_write(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        options: &WriteOptions,
        job: &mut JobContext,
    ) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(AtlasError::ShutdownInProgress);
        }
        self.bg_error.check()?;

        if !self.flush_scheduler.is_empty() {
            self.schedule_flushes(state, job)?;
        }

        if self.write_controller.is_stopped() || self.write_controller.needs_delay() {
            let num_bytes = state.last_batch_group_size as u64;
            self.delay_write(state, num_bytes, options)?;
        }
        Ok(())
    }

    /// Log and insert a group. Runs without the engine lock while the
    /// caller leads the write thread.
    fn write_group(
        &self,
        group: &WriteGroup,
        cf_mems: &ColumnFamilyMemTables,
        last_sequence: SequenceNumber,
        ignore_missing_column_families: bool,
    ) -> GroupOutcome {
        // Merge the batches; a lone batch is used as is.
        let mut merged = match group.members() {
            [only] => only.batch().cloned().unwrap_or_default(),
            members => {
                let mut merged = WriteBatch::new();
                for batch in members.iter().filter_map(|w| w.batch()) {
                    merged.append(batch);
                }
                merged
            }
        };
        let count = u64::from(merged.count());
        merged.set_sequence(last_sequence + 1);

        let mut outcome = GroupOutcome {
            status: Ok(()),
            count,
            wal_written: false,
            inserted: false,
        };

        // A group that cannot be applied in full is neither logged nor
        // inserted, and uses no sequence numbers.
        if let Err(e) = validate_batch(&merged, cf_mems, ignore_missing_column_families) {
            debug!(error = %e, "rejected write group");
            outcome.status = Err(e);
            return outcome;
        }

        if !group.disable_wal() {
            let mut log = self.log.lock();
            if let Err(e) = log.add_record(merged.data()) {
                warn!(error = %e, "log append failed");
                outcome.status = Err(e);
                return outcome;
            }
            outcome.wal_written = true;
            StatsCounters::add(&self.stats.wal_records, 1);
            StatsCounters::add(&self.stats.wal_bytes, merged.byte_size() as u64);

            if group.needs_sync() {
                if let Err(e) = log.sync() {
                    warn!(error = %e, "log sync failed");
                    outcome.status = Err(e);
                    return outcome;
                }
                StatsCounters::add(&self.stats.wal_syncs, 1);
            }
        }

        outcome.inserted = true;
        let mut inserter = MemTableInserter::new(
            merged.sequence(),
            cf_mems,
            Some(&self.flush_scheduler),
            ignore_missing_column_families,
            0,
        );
        outcome.status = merged.iterate(&mut inserter);
        outcome
    }

    /// Pace or block the leader while the write controller asks for it.
    ///
    /// A delay sleeps with the engine lock released. A stop waits on the
    /// background condvar until background work lifts it.
    fn delay_write(&self, state: &mut MutexGuard<'_, DbState>, num_bytes: u64, options: &WriteOptions) -> Result<()> {
        let start = self.clock.now_micros();
        let mut delayed = false;

        if !self.write_controller.is_stopped() && self.write_controller.needs_delay() {
            if options.no_slowdown {
                return Err(AtlasError::Busy("write stall".to_string()));
            }
            let delay = self.write_controller.get_delay(start, num_bytes);
            if delay > 0 {
                debug!(delay_micros = delay, num_bytes, "delaying write");
                MutexGuard::unlocked(state, || self.clock.sleep_for_micros(delay));
                delayed = true;
            }
        }

        while self.write_controller.is_stopped()
            && !self.bg_error.is_set()
            && !self.shutting_down.load(Ordering::Acquire)
        {
            if options.no_slowdown {
                return Err(AtlasError::Busy("write stall".to_string()));
            }
            delayed = true;
            self.bg_cv.wait_for(state, BG_WAIT_INTERVAL);
        }

        if delayed {
            StatsCounters::add(&self.stats.write_stalls, 1);
            StatsCounters::add(
                &self.stats.stall_micros,
                self.clock.now_micros().saturating_sub(start),
            );
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(AtlasError::ShutdownInProgress);
        }
        self.bg_error.check()
    }

    /// Switch the memtables writers reported full and queue their flushes.
    pub(crate) fn schedule_flushes(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        job: &mut JobContext,
    ) -> Result<()> {
        while let Some(cfd) = self.flush_scheduler.get_next_column_family(job) {
            let result = self.switch_memtable(state, &cfd, job);
            if result.is_ok() {
                cfd.request_flush();
                self.schedule_pending_flush(state, &cfd);
            }
            if cfd.unref() {
                cfd.destroy(job);
                state.column_families.free_dead_column_families(job);
            }
            result?;
        }
        self.maybe_schedule_flush_or_compaction(state);
        Ok(())
    }

    /// Retire the active memtable of `cfd` and start a new one.
    ///
    /// The caller leads the write thread, so no group is writing. A new log
    /// is started unless the current one is still empty; families with
    /// nothing buffered stop depending on older logs.
    pub(crate) fn switch_memtable(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cfd: &Arc<ColumnFamilyData>,
        job: &mut JobContext,
    ) -> Result<()> {
        let mut new_log_number = state.logfile_number;
        if !state.log_empty {
            new_log_number = state.new_file_number();
            let dir = self.config.wal_dir.clone();
            let new_log = MutexGuard::unlocked(state, || wal::open_log(dir.as_deref(), new_log_number))?;

            *self.log.lock() = new_log;
            state.logfile_number = new_log_number;
            state.log_empty = true;
            state.alive_logs.push_back(new_log_number);
            for other in state.column_families.alive() {
                if other.is_memory_empty() {
                    other.set_log_number(new_log_number);
                }
            }
        }

        let new_mem = cfd.construct_new_memtable();
        let retired = cfd.mem();
        cfd.switch_memtable(Arc::clone(&new_mem), new_log_number, &mut job.memtables_to_free);
        info!(
            cf = %cfd.name(),
            retired = retired.id(),
            entries = retired.num_entries(),
            memtable = new_mem.id(),
            log = new_log_number,
            "switched memtable"
        );
        StatsCounters::add(&self.stats.memtable_switches, 1);

        self.install_super_version_and_schedule_work(state, cfd, job);
        Ok(())
    }
}

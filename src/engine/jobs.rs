//! Flush and compaction scheduling and execution.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, error, info, warn};

use crate::column_family::ColumnFamilyData;
use crate::error::{AtlasError, Result};
use crate::job_context::JobContext;
use crate::memtable::MemTable;
use crate::types::InternalEntry;
use crate::version::Compaction;

use super::state::{DbState, StatsCounters};
use super::{EngineInner, BG_WAIT_INTERVAL};

impl EngineInner {
    // =========================================================================
    // Queueing (engine lock held)
    // =========================================================================

    pub(crate) fn schedule_pending_flush(&self, state: &mut DbState, cfd: &Arc<ColumnFamilyData>) {
        if !cfd.pending_flush() && cfd.is_flush_pending() {
            cfd.ref_();
            cfd.set_pending_flush(true);
            state.flush_queue.push_back(Arc::clone(cfd));
            state.unscheduled_flushes += 1;
        }
    }

    pub(crate) fn schedule_pending_compaction(&self, state: &mut DbState, cfd: &Arc<ColumnFamilyData>) {
        if self.config.max_background_compactions == 0 {
            return;
        }
        if !cfd.pending_compaction() && cfd.needs_compaction() {
            cfd.ref_();
            cfd.set_pending_compaction(true);
            state.compaction_queue.push_back(Arc::clone(cfd));
            state.unscheduled_compactions += 1;
        }
    }

    /// Hand queued work to the pools, up to their configured parallelism.
    pub(crate) fn maybe_schedule_flush_or_compaction(self: &Arc<Self>, state: &mut DbState) {
        if self.shutting_down.load(Ordering::Acquire) || self.bg_error.is_set() {
            return;
        }

        while state.unscheduled_flushes > 0 && state.bg_flush_scheduled < self.config.max_background_flushes {
            state.unscheduled_flushes -= 1;
            state.bg_flush_scheduled += 1;
            let engine = Arc::clone(self);
            if !self.flush_pool.schedule(move || engine.background_call_flush()) {
                state.unscheduled_flushes += 1;
                state.bg_flush_scheduled -= 1;
                break;
            }
        }

        while state.unscheduled_compactions > 0
            && state.bg_compaction_scheduled < self.config.max_background_compactions
        {
            state.unscheduled_compactions -= 1;
            state.bg_compaction_scheduled += 1;
            let engine = Arc::clone(self);
            if !self.compaction_pool.schedule(move || engine.background_call_compaction()) {
                state.unscheduled_compactions += 1;
                state.bg_compaction_scheduled -= 1;
                break;
            }
        }
    }

    /// Publish a new super version for `cfd` and queue whatever work its
    /// new shape calls for.
    pub(crate) fn install_super_version_and_schedule_work(
        self: &Arc<Self>,
        state: &mut DbState,
        cfd: &Arc<ColumnFamilyData>,
        job: &mut JobContext,
    ) {
        if let Some(old) = cfd.install_super_version() {
            job.superversions_to_free.push(old);
        }
        self.schedule_pending_flush(state, cfd);
        self.schedule_pending_compaction(state, cfd);
        self.maybe_schedule_flush_or_compaction(state);
    }

    // =========================================================================
    // Flush
    // =========================================================================

    fn background_call_flush(self: &Arc<Self>) {
        let mut job = JobContext::new(self.next_job_id());
        {
            let mut state = self.mutex.lock();
            let result = if self.shutting_down.load(Ordering::Acquire) {
                Err(AtlasError::ShutdownInProgress)
            } else if let Some(err) = self.bg_error.get() {
                Err(err)
            } else {
                self.background_flush(&mut state, &mut job)
            };

            if let Err(e) = &result {
                if !e.is_transient() && self.bg_error.set_if_unset(e) {
                    error!(job = job.job_id, error = %e, "background flush failed");
                }
            }

            self.find_obsolete_files(&mut state, &mut job);
            state.bg_flush_scheduled -= 1;
            self.maybe_schedule_flush_or_compaction(&mut state);
            self.bg_cv.notify_all();
        }
        self.clean_job(&mut job);
    }

    fn background_flush(self: &Arc<Self>, state: &mut MutexGuard<'_, DbState>, job: &mut JobContext) -> Result<()> {
        let cfd = loop {
            let Some(cfd) = state.flush_queue.pop_front() else {
                return Ok(());
            };
            cfd.set_pending_flush(false);
            if !cfd.is_dropped() && cfd.is_flush_pending() {
                break cfd;
            }
            if cfd.unref() {
                cfd.destroy(job);
                state.column_families.free_dead_column_families(job);
            }
        };

        let result = self.flush_memtable_to_output_file(state, &cfd, job);
        if cfd.unref() {
            cfd.destroy(job);
            state.column_families.free_dead_column_families(job);
        }
        result
    }

    /// Write the picked immutable memtables of `cfd` to one level-0 table.
    fn flush_memtable_to_output_file(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cfd: &Arc<ColumnFamilyData>,
        job: &mut JobContext,
    ) -> Result<()> {
        let mems = cfd.pick_memtables_to_flush();
        if mems.is_empty() {
            return Ok(());
        }
        let file_number = state.new_file_number();
        let entries = merge_memtable_entries(&mems);
        debug!(
            job = job.job_id,
            cf = %cfd.name(),
            memtables = mems.len(),
            entries = entries.len(),
            table = file_number,
            "flush started"
        );

        let store = Arc::clone(&self.table_store);
        let built = MutexGuard::unlocked(state, || store.build_table(file_number, entries));

        let output = match built {
            Ok(meta) => meta.map(Arc::new),
            Err(e) => {
                cfd.rollback_memtable_flush(&mems);
                warn!(job = job.job_id, cf = %cfd.name(), error = %e, "flush failed, memtables rolled back");
                return Err(e);
            }
        };

        if cfd.is_dropped() {
            cfd.rollback_memtable_flush(&mems);
            if let Some(file) = output {
                job.obsolete_tables.push(file.number);
            }
            debug!(job = job.job_id, cf = %cfd.name(), "column family dropped during flush");
            return Ok(());
        }

        let retired = cfd.install_memtable_flush_results(&mems, output.clone(), &mut job.memtables_to_free);
        self.install_super_version_and_schedule_work(state, cfd, job);
        StatsCounters::add(&self.stats.flushes_completed, 1);
        info!(
            job = job.job_id,
            cf = %cfd.name(),
            table = output.as_ref().map(|f| f.number),
            bytes = output.as_ref().map_or(0, |f| f.file_size),
            retired,
            "flush finished"
        );
        Ok(())
    }

    /// Block until `cfd` has no immutable memtables left.
    pub(crate) fn wait_for_flush(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        cfd: &Arc<ColumnFamilyData>,
    ) -> Result<()> {
        while cfd.imm_num_not_flushed() > 0 && !cfd.is_dropped() {
            self.bg_error.check()?;
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(AtlasError::ShutdownInProgress);
            }
            self.bg_cv.wait_for(state, BG_WAIT_INTERVAL);
        }
        self.bg_error.check()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    fn background_call_compaction(self: &Arc<Self>) {
        let mut job = JobContext::new(self.next_job_id());
        {
            let mut state = self.mutex.lock();
            let result = if self.shutting_down.load(Ordering::Acquire) {
                Err(AtlasError::ShutdownInProgress)
            } else if let Some(err) = self.bg_error.get() {
                Err(err)
            } else {
                self.background_compaction(&mut state, &mut job)
            };

            if let Err(e) = &result {
                if !e.is_transient() && self.bg_error.set_if_unset(e) {
                    error!(job = job.job_id, error = %e, "background compaction failed");
                }
            }

            self.find_obsolete_files(&mut state, &mut job);
            state.bg_compaction_scheduled -= 1;
            self.maybe_schedule_flush_or_compaction(&mut state);
            self.bg_cv.notify_all();
        }
        self.clean_job(&mut job);
    }

    fn background_compaction(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        job: &mut JobContext,
    ) -> Result<()> {
        let Some(cfd) = state.compaction_queue.pop_front() else {
            return Ok(());
        };
        cfd.set_pending_compaction(false);

        let mut result = Ok(());
        if !cfd.is_dropped() {
            if let Some(compaction) = cfd.pick_compaction() {
                result = self.run_compaction(state, &cfd, compaction, job);
            }
            if result.is_ok() {
                self.schedule_pending_compaction(state, &cfd);
            }
        }

        if cfd.unref() {
            cfd.destroy(job);
            state.column_families.free_dead_column_families(job);
        }
        result
    }

    /// Execute `compaction` and install its result.
    pub(crate) fn run_compaction(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        cfd: &Arc<ColumnFamilyData>,
        compaction: Compaction,
        job: &mut JobContext,
    ) -> Result<()> {
        if compaction.is_trivial_move() {
            cfd.apply_edit(&compaction.trivial_move_edit());
            debug!(
                job = job.job_id,
                cf = %cfd.name(),
                level = compaction.level,
                files = compaction.inputs.len(),
                "trivial move"
            );
        } else {
            let output_number = state.new_file_number();
            let smallest_snapshot = state
                .snapshots
                .oldest()
                .unwrap_or_else(|| self.last_sequence.load(Ordering::Acquire));
            let inputs = compaction.all_inputs();

            let store = Arc::clone(&self.table_store);
            let bottommost = compaction.bottommost;
            let result = MutexGuard::unlocked(state, || {
                store.compact(&inputs, output_number, smallest_snapshot, bottommost)
            });

            let output = match result {
                Ok(meta) => meta.map(Arc::new),
                Err(e) => {
                    cfd.release_compaction(&compaction);
                    warn!(job = job.job_id, cf = %cfd.name(), error = %e, "compaction failed");
                    return Err(e);
                }
            };
            cfd.apply_edit(&compaction.edit(output.clone()));
            state.obsolete_candidates.extend(inputs.iter().cloned());
            info!(
                job = job.job_id,
                cf = %cfd.name(),
                level = compaction.level,
                output_level = compaction.output_level,
                inputs = inputs.len(),
                table = output.as_ref().map(|f| f.number),
                smallest_snapshot,
                "compaction finished"
            );
        }

        cfd.release_compaction(&compaction);
        if let Some(old) = cfd.install_super_version() {
            job.superversions_to_free.push(old);
        }
        StatsCounters::add(&self.stats.compactions_completed, 1);
        Ok(())
    }

    // =========================================================================
    // Obsolete Files
    // =========================================================================

    /// Collect tables no version references and logs no family needs.
    pub(crate) fn find_obsolete_files(&self, state: &mut DbState, job: &mut JobContext) {
        let mut still_live = Vec::with_capacity(state.obsolete_candidates.len());
        for file in state.obsolete_candidates.drain(..) {
            if Arc::strong_count(&file) == 1 {
                job.obsolete_tables.push(file.number);
            } else {
                still_live.push(file);
            }
        }
        state.obsolete_candidates = still_live;

        let min_log_number = state
            .column_families
            .alive()
            .map(|cfd| cfd.log_number())
            .min()
            .unwrap_or(state.logfile_number);
        while let Some(&oldest) = state.alive_logs.front() {
            if oldest >= min_log_number || oldest == state.logfile_number {
                break;
            }
            state.alive_logs.pop_front();
            job.obsolete_logs.push(oldest);
        }

        if !job.obsolete_tables.is_empty() || !job.obsolete_logs.is_empty() {
            debug!(
                job = job.job_id,
                tables = ?job.obsolete_tables,
                logs = ?job.obsolete_logs,
                "obsolete files found"
            );
        }
    }
}

/// Entries of `mems` in table order. A key written to several memtables
/// keeps each version; sequence numbers are unique across memtables.
fn merge_memtable_entries(mems: &[Arc<MemTable>]) -> Vec<InternalEntry> {
    let mut entries: Vec<InternalEntry> = mems.iter().flat_map(|m| m.entries()).collect();
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    entries
}

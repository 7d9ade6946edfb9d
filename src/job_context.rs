//! Job Context Module
//!
//! Deferred cleanup for one write or background job.
//!
//! Work done under the engine lock moves anything expensive to free into a
//! [`JobContext`]: super versions that reached zero, memtables that lost
//! their last reference, destroyed column families, tables and logs no
//! version needs any more. The job
//! calls [`clean`](JobContext::clean) once the lock is released.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::column_family::ColumnFamilyData;
use crate::memtable::MemTable;
use crate::super_version::SuperVersion;
use crate::table_store::TableStore;
use crate::wal;

#[derive(Debug, Default)]
pub struct JobContext {
    pub job_id: u64,
    /// Already `prepare_release`d
    pub superversions_to_free: Vec<Arc<SuperVersion>>,
    pub memtables_to_free: Vec<Arc<MemTable>>,
    /// Destroyed families unlinked from the registry
    pub column_families_to_free: Vec<Arc<ColumnFamilyData>>,
    pub obsolete_tables: Vec<u64>,
    pub obsolete_logs: Vec<u64>,
}

impl JobContext {
    pub fn new(job_id: u64) -> Self {
        let mut ctx = Self::default();
        ctx.job_id = job_id;
        ctx
    }

    pub fn have_something_to_delete(&self) -> bool {
        !self.superversions_to_free.is_empty()
            || !self.memtables_to_free.is_empty()
            || !self.column_families_to_free.is_empty()
            || !self.obsolete_tables.is_empty()
            || !self.obsolete_logs.is_empty()
    }

    /// Free everything collected. Must run without the engine lock.
    /// Returns the ids of the memtables freed.
    pub fn clean(&mut self, table_store: &dyn TableStore, wal_dir: Option<&Path>) -> Vec<u64> {
        let mut freed: Vec<u64> = self.memtables_to_free.drain(..).map(|m| m.id()).collect();
        for sv in self.superversions_to_free.drain(..) {
            freed.extend(sv.finish_release());
        }
        for cfd in self.column_families_to_free.drain(..) {
            debug!(job = self.job_id, cf = %cfd.name(), "freeing column family");
        }

        for number in self.obsolete_tables.drain(..) {
            if let Err(e) = table_store.delete_table(number) {
                warn!(job = self.job_id, table = number, error = %e, "failed to delete obsolete table");
            }
        }
        if let Some(dir) = wal_dir {
            for number in self.obsolete_logs.drain(..) {
                if let Err(e) = wal::remove_log(dir, number) {
                    warn!(job = self.job_id, log = number, error = %e, "failed to delete obsolete log");
                }
            }
        } else {
            self.obsolete_logs.clear();
        }

        if !freed.is_empty() {
            debug!(job = self.job_id, memtables = ?freed, "job cleaned up");
        }
        freed
    }
}

impl Drop for JobContext {
    fn drop(&mut self) {
        if self.have_something_to_delete() {
            warn!(job = self.job_id, "job context dropped without cleanup");
        }
    }
}

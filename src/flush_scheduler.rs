//! Flush Scheduler Module
//!
//! Lock-free hand-off of full memtables from writers to the write leader.
//!
//! A writer whose insert fills a memtable pushes the owning column family
//! here. The next write leader drains the queue under the engine lock and
//! switches those memtables before applying its group.
//!
//! Each queued entry holds one reference on its column family. Whoever
//! takes an entry out owns that reference.

use std::sync::Arc;

use crossbeam::queue::SegQueue;
#[cfg(debug_assertions)]
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use std::collections::HashSet;

use crate::column_family::ColumnFamilyData;
use crate::job_context::JobContext;

#[derive(Default)]
pub struct FlushScheduler {
    queue: SegQueue<Arc<ColumnFamilyData>>,
    /// Families currently queued; a family must never be queued twice.
    #[cfg(debug_assertions)]
    checking: Mutex<HashSet<u32>>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `cfd` for a memtable switch. Safe from any thread.
    pub fn schedule_flush(&self, cfd: Arc<ColumnFamilyData>) {
        #[cfg(debug_assertions)]
        {
            let inserted = self.checking.lock().insert(cfd.id());
            assert!(inserted, "column family {} scheduled for flush twice", cfd.name());
        }
        cfd.ref_();
        self.queue.push(cfd);
    }

    /// Next queued family that has not been dropped. The caller owns the
    /// queue's reference on it. Dropped entries are discarded, destroying
    /// the family into `job` if that was its last reference, so this is
    /// called with the engine lock held.
    pub fn get_next_column_family(&self, job: &mut JobContext) -> Option<Arc<ColumnFamilyData>> {
        while let Some(cfd) = self.queue.pop() {
            #[cfg(debug_assertions)]
            self.checking.lock().remove(&cfd.id());

            if !cfd.is_dropped() {
                return Some(cfd);
            }
            if cfd.unref() {
                cfd.destroy(job);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discard every entry, releasing their references. Engine lock held.
    pub fn clear(&self, job: &mut JobContext) {
        while let Some(cfd) = self.queue.pop() {
            #[cfg(debug_assertions)]
            self.checking.lock().remove(&cfd.id());

            if cfd.unref() {
                cfd.destroy(job);
            }
        }
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler").field("queued", &self.queue.len()).finish()
    }
}

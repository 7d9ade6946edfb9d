//! Applying a batch to memtables.

use crate::column_family::{ColumnFamilyMemTables, MemTableTarget};
use crate::error::{AtlasError, Result};
use crate::flush_scheduler::FlushScheduler;
use crate::types::{SequenceNumber, ValueType};

use super::{Handler, WriteBatch};

/// [`Handler`] that inserts each record into its column family's memtable
/// with consecutive sequence numbers.
///
/// Every counted record consumes a sequence number, even one that is
/// skipped, so sequence assignment is identical on every replica of the log.
pub struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    cf_mems: &'a ColumnFamilyMemTables,
    flush_scheduler: Option<&'a FlushScheduler>,
    ignore_missing_column_families: bool,
    /// Log being replayed, 0 for live writes
    log_number: u64,
}

impl<'a> MemTableInserter<'a> {
    pub fn new(
        sequence: SequenceNumber,
        cf_mems: &'a ColumnFamilyMemTables,
        flush_scheduler: Option<&'a FlushScheduler>,
        ignore_missing_column_families: bool,
        log_number: u64,
    ) -> Self {
        Self {
            sequence,
            cf_mems,
            flush_scheduler,
            ignore_missing_column_families,
            log_number,
        }
    }

    /// Next sequence number to be assigned
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Resolve the target for `cf`. `Ok(None)` means skip the record.
    fn seek(&self, cf: u32) -> Result<Option<&'a MemTableTarget>> {
        let Some(target) = self.cf_mems.get(cf) else {
            if self.ignore_missing_column_families {
                return Ok(None);
            }
            return Err(AtlasError::InvalidArgument(format!("invalid column family id {cf}")));
        };
        // During replay, a family whose data from this log was already
        // flushed must not take it again.
        if self.log_number != 0 && self.log_number < target.log_number {
            return Ok(None);
        }
        Ok(Some(target))
    }

    fn insert(&mut self, cf: u32, kind: ValueType, key: &[u8], value: &[u8]) -> Result<()> {
        let sequence = self.sequence;
        self.sequence += 1;
        let Some(target) = self.seek(cf)? else {
            return Ok(());
        };
        target.mem.add(sequence, kind, key, value);
        self.check_memtable_full(target);
        Ok(())
    }

    fn check_memtable_full(&self, target: &MemTableTarget) {
        let Some(scheduler) = self.flush_scheduler else {
            return;
        };
        if target.mem.should_schedule_flush() && target.mem.mark_flush_scheduled() {
            scheduler.schedule_flush(target.cfd.clone());
        }
    }
}

impl Handler for MemTableInserter<'_> {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(cf, ValueType::Value, key, value)
    }

    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()> {
        self.insert(cf, ValueType::Deletion, key, &[])
    }

    fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(cf, ValueType::Merge, key, value)
    }
}

/// Resolves the column family of every record without inserting, so a
/// batch that would fail part way is rejected before any memtable changes.
struct ColumnFamilyChecker<'a> {
    cf_mems: &'a ColumnFamilyMemTables,
    ignore_missing_column_families: bool,
}

impl ColumnFamilyChecker<'_> {
    fn check(&self, cf: u32) -> Result<()> {
        if self.ignore_missing_column_families || self.cf_mems.get(cf).is_some() {
            return Ok(());
        }
        Err(AtlasError::InvalidArgument(format!("invalid column family id {cf}")))
    }
}

impl Handler for ColumnFamilyChecker<'_> {
    fn put_cf(&mut self, cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
        self.check(cf)
    }

    fn delete_cf(&mut self, cf: u32, _key: &[u8]) -> Result<()> {
        self.check(cf)
    }

    fn merge_cf(&mut self, cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
        self.check(cf)
    }
}

/// Check that `batch` decodes, that its header count matches its records,
/// and that every record names a known column family unless missing ones
/// are ignored.
pub fn validate_batch(
    batch: &WriteBatch,
    cf_mems: &ColumnFamilyMemTables,
    ignore_missing_column_families: bool,
) -> Result<()> {
    let mut checker = ColumnFamilyChecker {
        cf_mems,
        ignore_missing_column_families,
    };
    batch.iterate(&mut checker)
}

/// Insert every record of `batch`, numbering them from the batch's sequence.
///
/// The whole batch is validated first; on error no record is inserted.
pub fn insert_into(
    batch: &WriteBatch,
    cf_mems: &ColumnFamilyMemTables,
    flush_scheduler: Option<&FlushScheduler>,
    ignore_missing_column_families: bool,
    log_number: u64,
) -> Result<()> {
    validate_batch(batch, cf_mems, ignore_missing_column_families)?;
    let mut inserter = MemTableInserter::new(
        batch.sequence(),
        cf_mems,
        flush_scheduler,
        ignore_missing_column_families,
        log_number,
    );
    batch.iterate(&mut inserter)
}

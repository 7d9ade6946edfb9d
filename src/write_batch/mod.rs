//! Write Batch Module
//!
//! An atomic group of updates in its durable encoding. The same bytes are
//! written to the log and replayed into memtables.
//!
//! ## Responsibilities
//! - Encode puts, deletes, merges and log data blobs per column family
//! - Carry the starting sequence number and record count in a fixed header
//! - Concatenate batches when a group leader merges its followers
//! - Decode records back for memtable insertion and replay
//!
//! ## Encoding
//! ```text
//! ┌───────────────────┬─────────────┬───────────────────────────────┐
//! │ Sequence (8, LE)  │ Count (4,LE)│ Records ...                   │
//! └───────────────────┴─────────────┴───────────────────────────────┘
//!
//! Record:
//! ┌─────────┬──────────────────────┬──────────────────────────────┐
//! │ Tag (1) │ CF id (varint32)     │ Key, Value (varint32 + data) │
//! │         │ (CF-qualified tags)  │ Key only for deletions       │
//! └─────────┴──────────────────────┴──────────────────────────────┘
//! ```
//! Records addressed to column family 0 use the unqualified tags. Log data
//! records carry one blob and are not counted.

mod coding;
mod inserter;
mod iterator;

pub use coding::{get_length_prefixed_slice, get_varint32, put_length_prefixed_slice, put_varint32};
pub use inserter::{insert_into, validate_batch, MemTableInserter};
pub use iterator::{Handler, Record, Records};

use bytes::{BufMut, BytesMut};

use crate::error::{AtlasError, Result};
use crate::types::{SequenceNumber, ValueType};

/// Header size: 8 byte sequence + 4 byte count
pub const HEADER_SIZE: usize = 12;

/// An ordered set of updates applied atomically
#[derive(Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: BytesMut,
}

impl WriteBatch {
    pub fn new() -> Self {
        let mut rep = BytesMut::with_capacity(HEADER_SIZE);
        rep.put_bytes(0, HEADER_SIZE);
        Self { rep }
    }

    /// Wrap an encoded batch, e.g. a record read back from the log.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(AtlasError::Corruption("malformed write batch (too small)".to_string()));
        }
        Ok(Self {
            rep: BytesMut::from(data),
        })
    }

    // =========================================================================
    // Record Encoding
    // =========================================================================

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(0, key, value);
    }

    pub fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.put_tag(cf, ValueType::Value, ValueType::ColumnFamilyValue);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(0, key);
    }

    pub fn delete_cf(&mut self, cf: u32, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.put_tag(cf, ValueType::Deletion, ValueType::ColumnFamilyDeletion);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.merge_cf(0, key, value);
    }

    pub fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.put_tag(cf, ValueType::Merge, ValueType::ColumnFamilyMerge);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Attach an opaque blob that travels through the log but never reaches
    /// a memtable.
    pub fn put_log_data(&mut self, blob: &[u8]) {
        self.rep.put_u8(ValueType::LogData.tag());
        put_length_prefixed_slice(&mut self.rep, blob);
    }

    fn put_tag(&mut self, cf: u32, plain: ValueType, qualified: ValueType) {
        if cf == 0 {
            self.rep.put_u8(plain.tag());
        } else {
            self.rep.put_u8(qualified.tag());
            put_varint32(&mut self.rep, cf);
        }
    }

    /// Drop every record and reset the header.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.put_bytes(0, HEADER_SIZE);
    }

    // =========================================================================
    // Header Access
    // =========================================================================

    /// Number of counted records (log data excluded)
    pub fn count(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.rep[8..HEADER_SIZE]);
        u32::from_le_bytes(raw)
    }

    pub fn set_count(&mut self, count: u32) {
        self.rep[8..HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    /// Sequence number of the first record
    pub fn sequence(&self) -> SequenceNumber {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.rep[..8]);
        u64::from_le_bytes(raw)
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    // =========================================================================
    // Whole Batch Operations
    // =========================================================================

    /// Encoded contents, header included
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    pub fn byte_size(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rep.len() == HEADER_SIZE
    }

    /// Append `other`'s records and add its count to ours.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.put_slice(&other.rep[HEADER_SIZE..]);
    }

    /// Decode records in encoded order
    pub fn records(&self) -> Records<'_> {
        Records::new(&self.rep[HEADER_SIZE..])
    }

    /// Feed every record to `handler`, then verify the header count.
    pub fn iterate(&self, handler: &mut dyn Handler) -> Result<()> {
        let mut found: u32 = 0;
        let mut records = self.records();
        while handler.should_continue() {
            let record = match records.next() {
                Some(record) => record?,
                None => {
                    if found != self.count() {
                        return Err(AtlasError::Corruption(format!(
                            "write batch has wrong count: header {} found {}",
                            self.count(),
                            found
                        )));
                    }
                    return Ok(());
                }
            };
            match record {
                Record::Put { cf, key, value } => {
                    found += 1;
                    handler.put_cf(cf, key, value)?;
                }
                Record::Delete { cf, key } => {
                    found += 1;
                    handler.delete_cf(cf, key)?;
                }
                Record::Merge { cf, key, value } => {
                    found += 1;
                    handler.merge_cf(cf, key, value)?;
                }
                Record::LogData(blob) => handler.log_data(blob),
            }
        }
        Ok(())
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("sequence", &self.sequence())
            .field("count", &self.count())
            .field("byte_size", &self.byte_size())
            .finish()
    }
}

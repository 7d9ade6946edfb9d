//! Table file storage seen from the write path.
//!
//! Flush and compaction jobs hand sorted entries to a `TableStore` and get
//! back file metadata; lookups ask it for a key inside one file. The format
//! of the files themselves is the store's business.
//!
//! `InMemoryTableStore` keeps each "file" as a sorted vector and can be told
//! to fail builds, which is how background error handling is exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AtlasError, Result};
use crate::lookup::GetContext;
use crate::types::{InternalEntry, SequenceNumber, ValueType};
use crate::version::FileMetaData;

pub trait TableStore: Send + Sync {
    /// Persist `entries` (sorted by key, newest version first) as table
    /// `number`. Returns None when there is nothing to write.
    fn build_table(&self, number: u64, entries: Vec<InternalEntry>) -> Result<Option<FileMetaData>>;

    /// Feed versions of the context's key stored in `file`.
    fn get(&self, file: &FileMetaData, ctx: &mut GetContext<'_>) -> Result<bool>;

    /// Merge `inputs` into table `output_number`, dropping versions hidden
    /// from every snapshot at or above `smallest_snapshot`.
    fn compact(
        &self,
        inputs: &[Arc<FileMetaData>],
        output_number: u64,
        smallest_snapshot: SequenceNumber,
        bottommost: bool,
    ) -> Result<Option<FileMetaData>>;

    fn delete_table(&self, number: u64) -> Result<()>;
}

/// Drop versions no reader can observe.
///
/// For each key only the newest version at or below `smallest_snapshot` is
/// kept, plus everything newer. On the bottommost level a tombstone at or
/// below the snapshot has nothing left to shadow and is dropped too.
pub fn compact_entries(
    mut entries: Vec<InternalEntry>,
    smallest_snapshot: SequenceNumber,
    bottommost: bool,
) -> Vec<InternalEntry> {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let mut out: Vec<InternalEntry> = Vec::with_capacity(entries.len());
    let mut current_key: Option<Vec<u8>> = None;
    let mut last_sequence_for_key = SequenceNumber::MAX;

    for entry in entries {
        if current_key.as_deref() != Some(entry.user_key.as_slice()) {
            current_key = Some(entry.user_key.clone());
            last_sequence_for_key = SequenceNumber::MAX;
        }
        let hidden = last_sequence_for_key <= smallest_snapshot;
        last_sequence_for_key = entry.sequence;
        if hidden {
            continue;
        }
        if bottommost && entry.kind == ValueType::Deletion && entry.sequence <= smallest_snapshot {
            continue;
        }
        out.push(entry);
    }
    out
}

fn metadata_for(number: u64, entries: &[InternalEntry]) -> Option<FileMetaData> {
    let first = entries.first()?;
    let last = entries.last()?;
    Some(FileMetaData {
        number,
        file_size: entries
            .iter()
            .map(|e| (e.user_key.len() + e.value.len() + 9) as u64)
            .sum(),
        smallest: first.user_key.clone(),
        largest: last.user_key.clone(),
        smallest_seqno: entries.iter().map(|e| e.sequence).min().unwrap_or(0),
        largest_seqno: entries.iter().map(|e| e.sequence).max().unwrap_or(0),
        num_entries: entries.len() as u64,
    })
}

/// Table store that keeps every table in memory
#[derive(Default)]
pub struct InMemoryTableStore {
    tables: RwLock<HashMap<u64, Arc<Vec<InternalEntry>>>>,
    fail_builds: AtomicBool,
    builds: AtomicU64,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following build (flush or compaction output) fail.
    pub fn set_fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    /// Tables built so far, failed attempts excluded
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    pub fn contains(&self, number: u64) -> bool {
        self.tables.read().contains_key(&number)
    }

    fn store(&self, number: u64, entries: Vec<InternalEntry>) -> Result<Option<FileMetaData>> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(AtlasError::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure building table {number}"),
            ))));
        }
        let Some(meta) = metadata_for(number, &entries) else {
            return Ok(None);
        };
        self.tables.write().insert(number, Arc::new(entries));
        self.builds.fetch_add(1, Ordering::SeqCst);
        debug!(table = number, entries = meta.num_entries, "table built");
        Ok(Some(meta))
    }

    fn table(&self, number: u64) -> Result<Arc<Vec<InternalEntry>>> {
        self.tables
            .read()
            .get(&number)
            .cloned()
            .ok_or_else(|| AtlasError::Corruption(format!("missing table {number}")))
    }
}

impl TableStore for InMemoryTableStore {
    fn build_table(&self, number: u64, mut entries: Vec<InternalEntry>) -> Result<Option<FileMetaData>> {
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.store(number, entries)
    }

    fn get(&self, file: &FileMetaData, ctx: &mut GetContext<'_>) -> Result<bool> {
        let table = self.table(file.number)?;
        let key = ctx.user_key().to_vec();
        let snapshot = ctx.snapshot();
        let start = table.partition_point(|e| {
            (e.user_key.as_slice(), std::cmp::Reverse(e.sequence)) < (key.as_slice(), std::cmp::Reverse(snapshot))
        });
        for entry in table[start..].iter().take_while(|e| e.user_key == key) {
            if ctx.save_value(entry.kind, &entry.value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn compact(
        &self,
        inputs: &[Arc<FileMetaData>],
        output_number: u64,
        smallest_snapshot: SequenceNumber,
        bottommost: bool,
    ) -> Result<Option<FileMetaData>> {
        let mut entries = Vec::new();
        for file in inputs {
            entries.extend(self.table(file.number)?.iter().cloned());
        }
        let merged = compact_entries(entries, smallest_snapshot, bottommost);
        self.store(output_number, merged)
    }

    fn delete_table(&self, number: u64) -> Result<()> {
        self.tables.write().remove(&number);
        debug!(table = number, "table deleted");
        Ok(())
    }
}

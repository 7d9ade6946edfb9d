//! On-disk state of a column family
//!
//! A `Version` is an immutable list of table files per level. Flushes and
//! compactions describe their effect as a `VersionEdit`; applying it yields
//! the next `Version`. Versions are shared through `Arc`, so a super version
//! keeps the files it reads from alive for as long as it is referenced.
//!
//! ## Levels
//! ```text
//!   L0: overlapping files, newest first (one per flush)
//!   L1..Ln: sorted, non-overlapping runs; each level ~10x the previous
//! ```
//!
//! Choosing what to compact is delegated to a [`CompactionPicker`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::comparator::Comparator;
use crate::error::{AtlasError, Result};
use crate::lookup::GetContext;
use crate::options::ColumnFamilyOptions;
use crate::table_store::TableStore;
use crate::types::SequenceNumber;

/// Metadata of one table file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub num_entries: u64,
}

/// Difference between two consecutive versions
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub log_number: Option<u64>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, Arc<FileMetaData>)>,
}

impl VersionEdit {
    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn add_file(&mut self, level: usize, file: Arc<FileMetaData>) {
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }
}

// =============================================================================
// Version
// =============================================================================

pub struct Version {
    levels: Vec<Vec<Arc<FileMetaData>>>,
    comparator: Arc<dyn Comparator>,
}

impl Version {
    pub fn new(num_levels: usize, comparator: Arc<dyn Comparator>) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
            comparator,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.levels[level]
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.levels[level].iter().map(|f| f.file_size).sum()
    }

    /// Numbers of every file this version references
    pub fn live_files(&self) -> Vec<u64> {
        self.levels.iter().flatten().map(|f| f.number).collect()
    }

    /// Build the successor version described by `edit`.
    pub fn apply(&self, edit: &VersionEdit) -> Version {
        let mut levels = self.levels.clone();
        for (level, number) in &edit.deleted_files {
            levels[*level].retain(|f| f.number != *number);
        }
        for (level, file) in &edit.new_files {
            levels[*level].push(Arc::clone(file));
        }

        levels[0].sort_by(|a, b| {
            b.largest_seqno
                .cmp(&a.largest_seqno)
                .then_with(|| b.number.cmp(&a.number))
        });
        for files in levels.iter_mut().skip(1) {
            files.sort_by(|a, b| self.comparator.compare(&a.smallest, &b.smallest));
        }

        Version {
            levels,
            comparator: Arc::clone(&self.comparator),
        }
    }

    // =========================================================================
    // Compaction Scoring
    // =========================================================================

    /// Level with the highest compaction score, ignoring `excluded` files.
    /// The last level is never a compaction source.
    pub fn compaction_score(&self, options: &ColumnFamilyOptions, excluded: &HashSet<u64>) -> (usize, f64) {
        let mut best = (0, 0.0);
        for level in 0..self.levels.len().saturating_sub(1) {
            let candidates = self.levels[level].iter().filter(|f| !excluded.contains(&f.number));
            let score = if level == 0 {
                candidates.count() as f64 / options.level0_file_num_compaction_trigger as f64
            } else {
                let bytes: u64 = candidates.map(|f| f.file_size).sum();
                bytes as f64 / options.max_bytes_for_level(level) as f64
            };
            if score > best.1 {
                best = (level, score);
            }
        }
        best
    }

    pub fn needs_compaction(&self, options: &ColumnFamilyOptions) -> bool {
        self.compaction_score(options, &HashSet::new()).1 >= 1.0
    }

    // =========================================================================
    // Key Range Queries
    // =========================================================================

    fn before(&self, key: &[u8], bound: Option<&[u8]>) -> bool {
        bound.is_some_and(|b| self.comparator.compare(key, b) == Ordering::Less)
    }

    fn after(&self, key: &[u8], bound: Option<&[u8]>) -> bool {
        bound.is_some_and(|b| self.comparator.compare(key, b) == Ordering::Greater)
    }

    /// Files of `level` whose range intersects `[begin, end]` (None is
    /// unbounded). Level-0 ranges are widened until no further overlapping
    /// file is found, since level-0 files overlap each other.
    pub fn overlapping_inputs(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Vec<Arc<FileMetaData>> {
        let mut lo = begin.map(|b| b.to_vec());
        let mut hi = end.map(|e| e.to_vec());
        loop {
            let mut inputs = Vec::new();
            let mut widened = false;
            for file in &self.levels[level] {
                if self.before(&file.largest, lo.as_deref()) || self.after(&file.smallest, hi.as_deref()) {
                    continue;
                }
                if level == 0 {
                    if self.before(&file.smallest, lo.as_deref()) {
                        lo = Some(file.smallest.clone());
                        widened = true;
                    }
                    if self.after(&file.largest, hi.as_deref()) {
                        hi = Some(file.largest.clone());
                        widened = true;
                    }
                }
                inputs.push(Arc::clone(file));
            }
            if !widened {
                return inputs;
            }
        }
    }

    /// True if any file below `level` intersects `[smallest, largest]`.
    pub fn has_overlap_below(&self, level: usize, smallest: &[u8], largest: &[u8]) -> bool {
        ((level + 1)..self.levels.len())
            .any(|deeper| !self.overlapping_inputs(deeper, Some(smallest), Some(largest)).is_empty())
    }

    /// Smallest and largest key across `files`.
    pub fn key_range(&self, files: &[Arc<FileMetaData>]) -> Option<(Vec<u8>, Vec<u8>)> {
        let smallest = files
            .iter()
            .map(|f| &f.smallest)
            .min_by(|a, b| self.comparator.compare(a, b))?;
        let largest = files
            .iter()
            .map(|f| &f.largest)
            .max_by(|a, b| self.comparator.compare(a, b))?;
        Some((smallest.clone(), largest.clone()))
    }

    /// Consult table files for the context's key, level 0 newest first.
    pub fn get(&self, ctx: &mut GetContext<'_>, store: &dyn TableStore) -> Result<bool> {
        let key = ctx.user_key().to_vec();
        for file in &self.levels[0] {
            if self.before(&key, Some(&file.smallest)) || self.after(&key, Some(&file.largest)) {
                continue;
            }
            if store.get(file, ctx)? {
                return Ok(true);
            }
        }
        for files in self.levels.iter().skip(1) {
            let idx = files.partition_point(|f| self.comparator.compare(&f.largest, &key) == Ordering::Less);
            if let Some(file) = files.get(idx) {
                if !self.before(&key, Some(&file.smallest)) && store.get(file, ctx)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

// =============================================================================
// Compaction Picking
// =============================================================================

/// One unit of compaction work
#[derive(Debug, Clone)]
pub struct Compaction {
    pub level: usize,
    pub output_level: usize,
    pub inputs: Vec<Arc<FileMetaData>>,
    pub output_level_inputs: Vec<Arc<FileMetaData>>,
    /// No deeper level holds keys in this range, so tombstones can be dropped
    pub bottommost: bool,
}

impl Compaction {
    pub fn all_inputs(&self) -> Vec<Arc<FileMetaData>> {
        self.inputs.iter().chain(self.output_level_inputs.iter()).cloned().collect()
    }

    /// A single file with nothing to merge against moves down unchanged.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs.len() == 1 && self.output_level_inputs.is_empty()
    }

    /// Edit removing every input and adding `output` (if any) one level down.
    pub fn edit(&self, output: Option<Arc<FileMetaData>>) -> VersionEdit {
        let mut edit = VersionEdit::default();
        for file in &self.inputs {
            edit.delete_file(self.level, file.number);
        }
        for file in &self.output_level_inputs {
            edit.delete_file(self.output_level, file.number);
        }
        if let Some(output) = output {
            edit.add_file(self.output_level, output);
        }
        edit
    }

    pub fn trivial_move_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::default();
        for file in &self.inputs {
            edit.delete_file(self.level, file.number);
            edit.add_file(self.output_level, Arc::clone(file));
        }
        edit
    }
}

/// Chooses compaction inputs for a column family.
pub trait CompactionPicker: Send + Sync {
    fn needs_compaction(&self, version: &Version, options: &ColumnFamilyOptions) -> bool;

    fn pick_compaction(&self, version: &Version, options: &ColumnFamilyOptions) -> Option<Compaction>;

    /// Inputs for a manual compaction of `level` over `[begin, end]`.
    /// Fails with `Busy` while any of those files is already being compacted.
    fn compact_range(
        &self,
        version: &Version,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Option<Compaction>>;

    /// Unmark the inputs of a finished compaction.
    fn release_compaction(&self, compaction: &Compaction);
}

/// Leveled compaction: pick the level with the highest score and merge it
/// into the next one.
#[derive(Debug, Default)]
pub struct LevelCompactionPicker {
    being_compacted: Mutex<HashSet<u64>>,
}

impl LevelCompactionPicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files_being_compacted(&self) -> usize {
        self.being_compacted.lock().len()
    }

    fn setup(
        &self,
        busy: &mut HashSet<u64>,
        version: &Version,
        level: usize,
        inputs: Vec<Arc<FileMetaData>>,
    ) -> Option<Compaction> {
        let (smallest, largest) = version.key_range(&inputs)?;
        let output_level = level + 1;
        let output_level_inputs = version.overlapping_inputs(output_level, Some(&smallest), Some(&largest));
        if output_level_inputs.iter().any(|f| busy.contains(&f.number)) {
            return None;
        }
        let bottommost = !version.has_overlap_below(output_level, &smallest, &largest);
        let compaction = Compaction {
            level,
            output_level,
            inputs,
            output_level_inputs,
            bottommost,
        };
        for file in compaction.all_inputs() {
            busy.insert(file.number);
        }
        Some(compaction)
    }
}

impl CompactionPicker for LevelCompactionPicker {
    fn needs_compaction(&self, version: &Version, options: &ColumnFamilyOptions) -> bool {
        let busy = self.being_compacted.lock();
        version.compaction_score(options, &busy).1 >= 1.0
    }

    fn pick_compaction(&self, version: &Version, options: &ColumnFamilyOptions) -> Option<Compaction> {
        let mut busy = self.being_compacted.lock();
        let (level, score) = version.compaction_score(options, &busy);
        if score < 1.0 {
            return None;
        }

        if level == 0 {
            // Level-0 files overlap, so only one level-0 compaction at a time.
            if version.files(0).iter().any(|f| busy.contains(&f.number)) {
                return None;
            }
            let inputs = version.files(0).to_vec();
            return self.setup(&mut busy, version, 0, inputs);
        }

        let candidates: Vec<Arc<FileMetaData>> = version
            .files(level)
            .iter()
            .filter(|f| !busy.contains(&f.number))
            .cloned()
            .collect();
        candidates
            .into_iter()
            .find_map(|file| self.setup(&mut busy, version, level, vec![file]))
    }

    fn compact_range(
        &self,
        version: &Version,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Option<Compaction>> {
        if level + 1 >= version.num_levels() {
            return Ok(None);
        }
        let inputs = version.overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return Ok(None);
        }
        let mut busy = self.being_compacted.lock();
        if inputs.iter().any(|f| busy.contains(&f.number)) {
            return Err(AtlasError::Busy(format!("level {level} files are being compacted")));
        }
        match self.setup(&mut busy, version, level, inputs) {
            Some(compaction) => Ok(Some(compaction)),
            None => Err(AtlasError::Busy(format!("level {} files are being compacted", level + 1))),
        }
    }

    fn release_compaction(&self, compaction: &Compaction) {
        let mut busy = self.being_compacted.lock();
        for file in compaction.all_inputs() {
            busy.remove(&file.number);
        }
    }
}

//! Snapshots
//!
//! A snapshot pins a sequence number; reads through it see exactly the
//! writes at or below it. Compactions keep every version a live snapshot
//! can still observe.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::EngineInner;
use crate::types::SequenceNumber;

/// Live snapshots by sequence, with a count for duplicates. Guarded by the
/// engine lock.
#[derive(Debug, Default)]
pub struct SnapshotList {
    live: BTreeMap<SequenceNumber, usize>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sequence: SequenceNumber) {
        *self.live.entry(sequence).or_insert(0) += 1;
    }

    pub fn remove(&mut self, sequence: SequenceNumber) {
        if let Some(count) = self.live.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(&sequence);
            }
        }
    }

    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.live.keys().next().copied()
    }

    pub fn newest(&self) -> Option<SequenceNumber> {
        self.live.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.live.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Handle to a live snapshot; released on drop.
pub struct Snapshot {
    sequence: SequenceNumber,
    owner: Arc<EngineInner>,
}

impl Snapshot {
    pub(crate) fn new(sequence: SequenceNumber, owner: Arc<EngineInner>) -> Self {
        Self { sequence, owner }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.owner.mutex.lock().snapshots.remove(self.sequence);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("sequence", &self.sequence).finish()
    }
}

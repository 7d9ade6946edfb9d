//! Point lookup state carried across memtables and table files.
//!
//! Sources are consulted newest first. Each hands its versions of the key to
//! [`GetContext::save_value`] until one of them settles the answer; merge
//! operands collected on the way are folded when a base value, a tombstone
//! or the end of the data is reached.

use crate::comparator::MergeOperator;
use crate::error::{AtlasError, Result};
use crate::types::{SequenceNumber, ValueType};

enum LookupState {
    Searching,
    Found(Vec<u8>),
    Deleted,
    Failed(AtlasError),
}

pub struct GetContext<'a> {
    user_key: &'a [u8],
    snapshot: SequenceNumber,
    merge_operator: Option<&'a dyn MergeOperator>,
    state: LookupState,
    /// Newest first
    operands: Vec<Vec<u8>>,
}

impl<'a> GetContext<'a> {
    pub fn new(user_key: &'a [u8], snapshot: SequenceNumber, merge_operator: Option<&'a dyn MergeOperator>) -> Self {
        Self {
            user_key,
            snapshot,
            merge_operator,
            state: LookupState::Searching,
            operands: Vec::new(),
        }
    }

    pub fn user_key(&self) -> &[u8] {
        self.user_key
    }

    /// Entries newer than this are invisible to the lookup.
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.state, LookupState::Searching)
    }

    /// Feed the next older version of the key. Returns true once the lookup
    /// is settled and no older source needs to be consulted.
    pub fn save_value(&mut self, kind: ValueType, value: &[u8]) -> bool {
        match kind {
            ValueType::Value => {
                self.state = if self.operands.is_empty() {
                    LookupState::Found(value.to_vec())
                } else {
                    self.fold(Some(value))
                };
                true
            }
            ValueType::Deletion => {
                self.state = if self.operands.is_empty() {
                    LookupState::Deleted
                } else {
                    self.fold(None)
                };
                true
            }
            ValueType::Merge => {
                if self.merge_operator.is_none() {
                    self.state = LookupState::Failed(AtlasError::NotSupported(
                        "merge operator not configured".to_string(),
                    ));
                    return true;
                }
                self.operands.push(value.to_vec());
                false
            }
            _ => false,
        }
    }

    fn fold(&self, base: Option<&[u8]>) -> LookupState {
        let Some(operator) = self.merge_operator else {
            return LookupState::Failed(AtlasError::NotSupported("merge operator not configured".to_string()));
        };
        let oldest_first: Vec<Vec<u8>> = self.operands.iter().rev().cloned().collect();
        match operator.full_merge(self.user_key, base, &oldest_first) {
            Ok(merged) => LookupState::Found(merged),
            Err(err) => LookupState::Failed(err),
        }
    }

    /// Final answer once every source has been consulted.
    pub fn finish(self) -> Result<Option<Vec<u8>>> {
        match self.state {
            LookupState::Found(value) => Ok(Some(value)),
            LookupState::Deleted => Ok(None),
            LookupState::Failed(err) => Err(err),
            LookupState::Searching if self.operands.is_empty() => Ok(None),
            LookupState::Searching => match self.fold(None) {
                LookupState::Found(value) => Ok(Some(value)),
                LookupState::Failed(err) => Err(err),
                _ => Ok(None),
            },
        }
    }
}

//! User key ordering and merge semantics.
//!
//! Both are pluggable per column family. The engine only calls through these
//! traits; it never interprets user keys or merge operands itself.

use std::cmp::Ordering;

use crate::error::Result;

/// Total order over user keys.
pub trait Comparator: Send + Sync {
    /// Stable name, surfaced through column family handles.
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "atlasdb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Combines merge operands with an optional base value.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    /// `operands` are ordered oldest first.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Result<Vec<u8>>;
}

/// Joins the base value and every operand with a delimiter byte.
#[derive(Debug, Clone, Copy)]
pub struct StringAppendOperator {
    delimiter: u8,
}

impl StringAppendOperator {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "atlasdb.StringAppendOperator"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Result<Vec<u8>> {
        let mut out = existing.map(|v| v.to_vec()).unwrap_or_default();
        for operand in operands {
            if !out.is_empty() {
                out.push(self.delimiter);
            }
            out.extend_from_slice(operand);
        }
        Ok(out)
    }
}

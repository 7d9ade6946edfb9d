//! Record decoding for write batches.

use crate::error::{AtlasError, Result};
use crate::types::ValueType;

use super::coding::{get_length_prefixed_slice, get_varint32};

/// One decoded record, borrowing from the batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Put { cf: u32, key: &'a [u8], value: &'a [u8] },
    Delete { cf: u32, key: &'a [u8] },
    Merge { cf: u32, key: &'a [u8], value: &'a [u8] },
    LogData(&'a [u8]),
}

/// Callbacks invoked by [`super::WriteBatch::iterate`].
pub trait Handler {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()>;

    fn merge_cf(&mut self, _cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(AtlasError::InvalidArgument("merge not supported by this handler".to_string()))
    }

    fn log_data(&mut self, _blob: &[u8]) {}

    /// Returning false stops iteration early without error.
    fn should_continue(&self) -> bool {
        true
    }
}

/// Iterator over the records following the header.
///
/// Yields one `Corruption` error and then stops if the encoding is malformed.
pub struct Records<'a> {
    input: &'a [u8],
    failed: bool,
}

impl<'a> Records<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input, failed: false }
    }

    fn decode_next(&mut self) -> Result<Record<'a>> {
        let tag = self.input[0];
        self.input = &self.input[1..];
        let kind = ValueType::from_tag(tag)
            .ok_or_else(|| AtlasError::Corruption(format!("unknown write batch tag {tag:#x}")))?;

        let cf = match kind {
            ValueType::ColumnFamilyValue | ValueType::ColumnFamilyDeletion | ValueType::ColumnFamilyMerge => {
                get_varint32(&mut self.input)
                    .ok_or_else(|| AtlasError::Corruption("bad write batch column family id".to_string()))?
            }
            _ => 0,
        };

        match kind {
            ValueType::Value | ValueType::ColumnFamilyValue => {
                let (key, value) = self.key_value("put")?;
                Ok(Record::Put { cf, key, value })
            }
            ValueType::Deletion | ValueType::ColumnFamilyDeletion => {
                let key = get_length_prefixed_slice(&mut self.input)
                    .ok_or_else(|| AtlasError::Corruption("bad write batch delete".to_string()))?;
                Ok(Record::Delete { cf, key })
            }
            ValueType::Merge | ValueType::ColumnFamilyMerge => {
                let (key, value) = self.key_value("merge")?;
                Ok(Record::Merge { cf, key, value })
            }
            ValueType::LogData => {
                let blob = get_length_prefixed_slice(&mut self.input)
                    .ok_or_else(|| AtlasError::Corruption("bad write batch blob".to_string()))?;
                Ok(Record::LogData(blob))
            }
        }
    }

    fn key_value(&mut self, what: &str) -> Result<(&'a [u8], &'a [u8])> {
        let key = get_length_prefixed_slice(&mut self.input);
        let value = get_length_prefixed_slice(&mut self.input);
        match (key, value) {
            (Some(key), Some(value)) => Ok((key, value)),
            _ => Err(AtlasError::Corruption(format!("bad write batch {what}"))),
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.input.is_empty() {
            return None;
        }
        let decoded = self.decode_next();
        if decoded.is_err() {
            self.failed = true;
        }
        Some(decoded)
    }
}

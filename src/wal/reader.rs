//! Log reader for replay

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{AtlasError, Result};

use super::RECORD_HEADER_SIZE;

/// Read every complete record of the log at `path`.
///
/// A truncated final record (a write torn by a crash) ends the log without
/// error. A checksum mismatch on a complete record is `Corruption`.
pub fn read_log(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = fs::read(path)?;
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if data.len() - offset < RECORD_HEADER_SIZE {
            warn!(path = %path.display(), offset, "truncated log record header");
            break;
        }
        let crc = u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
        let len = u32::from_le_bytes([data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]]) as usize;
        let start = offset + RECORD_HEADER_SIZE;
        if data.len() - start < len {
            warn!(path = %path.display(), offset, "truncated log record payload");
            break;
        }
        let payload = &data[start..start + len];
        if crc32fast::hash(payload) != crc {
            return Err(AtlasError::Corruption(format!(
                "log record checksum mismatch at offset {offset} in {}",
                path.display()
            )));
        }
        records.push(payload.to_vec());
        offset = start + len;
    }
    Ok(records)
}

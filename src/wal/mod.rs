//! Write-Ahead Log (WAL) Module
//!
//! Sinks for encoded write batches. A batch group leader appends one record
//! per group; a new log is started whenever a non-empty log's memtable is
//! retired.
//!
//! ## Responsibilities
//! - Append group records, optionally syncing before the write returns
//! - Name log files by their file number
//! - Read records back for replay, stopping cleanly at a torn tail
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────┐
//! │ Record 1                        │
//! │ ┌─────────┬─────────┬────────┐  │
//! │ │ CRC (4) │ Len (4) │ Batch  │  │
//! │ └─────────┴─────────┴────────┘  │
//! ├─────────────────────────────────┤
//! │ Record 2 ...                    │
//! └─────────────────────────────────┘
//! ```

mod memory;
mod reader;
mod writer;

pub use memory::MemoryLogWriter;
pub use reader::read_log;
pub use writer::FileLogWriter;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Record header: 4 byte CRC + 4 byte length
pub const RECORD_HEADER_SIZE: usize = 8;

/// Destination of group commit records
pub trait LogWriter: Send {
    fn add_record(&mut self, record: &[u8]) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    /// File number this log was opened with
    fn log_number(&self) -> u64;

    fn records_written(&self) -> u64;
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

/// Open log `number` in `dir`, or an in-memory log when no directory is set.
pub fn open_log(dir: Option<&Path>, number: u64) -> Result<Box<dyn LogWriter>> {
    match dir {
        Some(dir) => Ok(Box::new(FileLogWriter::create(&log_file_name(dir, number), number)?)),
        None => Ok(Box::new(MemoryLogWriter::new(number))),
    }
}

pub fn remove_log(dir: &Path, number: u64) -> Result<()> {
    std::fs::remove_file(log_file_name(dir, number))?;
    Ok(())
}

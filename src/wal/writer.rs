//! File-backed log writer

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

use super::LogWriter;

/// Appends framed records to a log file
pub struct FileLogWriter {
    file: BufWriter<File>,
    number: u64,
    records: u64,
}

impl FileLogWriter {
    /// Create (or truncate) the log file at `path`.
    pub fn create(path: &Path, number: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            number,
            records: 0,
        })
    }
}

impl LogWriter for FileLogWriter {
    fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let crc = crc32fast::hash(record);
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&(record.len() as u32).to_le_bytes())?;
        self.file.write_all(record)?;
        self.file.flush()?;
        self.records += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    fn log_number(&self) -> u64 {
        self.number
    }

    fn records_written(&self) -> u64 {
        self.records
    }
}

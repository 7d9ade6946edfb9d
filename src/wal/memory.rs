//! In-memory log, used when no log directory is configured

use crate::error::Result;

use super::LogWriter;

#[derive(Debug, Default)]
pub struct MemoryLogWriter {
    number: u64,
    records: Vec<Vec<u8>>,
    syncs: u64,
}

impl MemoryLogWriter {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn syncs(&self) -> u64 {
        self.syncs
    }
}

impl LogWriter for MemoryLogWriter {
    fn add_record(&mut self, record: &[u8]) -> Result<()> {
        self.records.push(record.to_vec());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }

    fn log_number(&self) -> u64 {
        self.number
    }

    fn records_written(&self) -> u64 {
        self.records.len() as u64
    }
}

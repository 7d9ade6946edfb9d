//! Tests for the write-ahead log
//!
//! These tests verify:
//! - File logs frame each group record and read back in order
//! - Log files are named by their file number
//! - A torn final record ends replay cleanly
//! - A damaged record is reported as corruption
//! - In-memory logs count records and syncs

use std::fs;
use std::io::Write;

use atlasdb::error::AtlasError;
use atlasdb::wal::{self, read_log, FileLogWriter, LogWriter, MemoryLogWriter, RECORD_HEADER_SIZE};
use atlasdb::WriteBatch;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn batch_with(keys: &[&str], sequence: u64) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for key in keys {
        batch.put(key.as_bytes(), b"v");
    }
    batch.set_sequence(sequence);
    batch
}

// =============================================================================
// File Log Tests
// =============================================================================

#[test]
fn test_file_log_records_read_back_in_order() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 3);

    let first = batch_with(&["a", "b"], 1);
    let second = batch_with(&["c"], 3);
    {
        let mut log = FileLogWriter::create(&path, 3).unwrap();
        log.add_record(first.data()).unwrap();
        log.add_record(second.data()).unwrap();
        assert_eq!(log.records_written(), 2);
        assert_eq!(log.log_number(), 3);
    }

    let records = read_log(&path).unwrap();
    assert_eq!(records.len(), 2);

    let decoded = WriteBatch::from_bytes(&records[1]).unwrap();
    assert_eq!(decoded.sequence(), 3);
    assert_eq!(decoded.count(), 1);
    assert_eq!(records[0], first.data());
}

#[test]
fn test_record_is_visible_without_sync() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 1);

    let mut log = FileLogWriter::create(&path, 1).unwrap();
    log.add_record(b"unsynced").unwrap();

    // The writer is still open; the record must already be in the file.
    let on_disk = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(on_disk, RECORD_HEADER_SIZE + b"unsynced".len());
    assert_eq!(read_log(&path).unwrap(), vec![b"unsynced".to_vec()]);
}

#[test]
fn test_open_log_names_file_by_number() {
    let temp = TempDir::new().unwrap();

    let mut log = wal::open_log(Some(temp.path()), 42).unwrap();
    log.add_record(b"x").unwrap();
    log.sync().unwrap();

    let path = wal::log_file_name(temp.path(), 42);
    assert!(path.exists());
    assert_eq!(path.file_name().unwrap().to_str().unwrap(), "000042.log");

    wal::remove_log(temp.path(), 42).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_remove_missing_log_is_io_error() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(wal::remove_log(temp.path(), 9), Err(AtlasError::Io(_))));
}

#[test]
fn test_create_truncates_existing_log() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 5);
    {
        let mut log = FileLogWriter::create(&path, 5).unwrap();
        log.add_record(b"old").unwrap();
    }
    {
        let mut log = FileLogWriter::create(&path, 5).unwrap();
        log.add_record(b"new").unwrap();
    }
    assert_eq!(read_log(&path).unwrap(), vec![b"new".to_vec()]);
}

// =============================================================================
// Replay Edge Cases
// =============================================================================

#[test]
fn test_empty_log_has_no_records() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 1);
    FileLogWriter::create(&path, 1).unwrap();

    assert!(read_log(&path).unwrap().is_empty());
}

#[test]
fn test_torn_header_ends_replay() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 1);
    {
        let mut log = FileLogWriter::create(&path, 1).unwrap();
        log.add_record(b"complete").unwrap();
    }
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; RECORD_HEADER_SIZE - 1]).unwrap();

    assert_eq!(read_log(&path).unwrap(), vec![b"complete".to_vec()]);
}

#[test]
fn test_torn_payload_ends_replay() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 1);
    {
        let mut log = FileLogWriter::create(&path, 1).unwrap();
        log.add_record(b"complete").unwrap();
        log.add_record(b"cut short by a crash").unwrap();
    }
    let len = fs::metadata(&path).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 4).unwrap();

    assert_eq!(read_log(&path).unwrap(), vec![b"complete".to_vec()]);
}

#[test]
fn test_damaged_first_record_is_corruption() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 1);
    {
        let mut log = FileLogWriter::create(&path, 1).unwrap();
        log.add_record(b"first").unwrap();
        log.add_record(b"second").unwrap();
    }
    let mut data = fs::read(&path).unwrap();
    data[RECORD_HEADER_SIZE] ^= 0x01;
    fs::write(&path, data).unwrap();

    assert!(matches!(read_log(&path), Err(AtlasError::Corruption(_))));
}

#[test]
fn test_missing_log_is_io_error() {
    let temp = TempDir::new().unwrap();
    let path = wal::log_file_name(temp.path(), 77);
    assert!(matches!(read_log(&path), Err(AtlasError::Io(_))));
}

// =============================================================================
// In-Memory Log Tests
// =============================================================================

#[test]
fn test_memory_log_counts_records_and_syncs() {
    let mut log = MemoryLogWriter::new(4);
    log.add_record(b"one").unwrap();
    log.add_record(b"two").unwrap();
    log.sync().unwrap();

    assert_eq!(log.log_number(), 4);
    assert_eq!(log.records_written(), 2);
    assert_eq!(log.syncs(), 1);
    assert_eq!(log.records()[1], b"two".to_vec());
}

#[test]
fn test_open_log_without_directory_is_in_memory() {
    let mut log = wal::open_log(None, 8).unwrap();
    log.add_record(b"kept in memory").unwrap();
    log.sync().unwrap();

    assert_eq!(log.log_number(), 8);
    assert_eq!(log.records_written(), 1);
}

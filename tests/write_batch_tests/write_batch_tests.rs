//! Tests for WriteBatch
//!
//! These tests verify:
//! - Byte-exact header and record encoding
//! - Decoding Put/Delete/Merge records across column families
//! - Log data blobs are carried but not counted
//! - Appending batches sums counts and keeps record order
//! - Malformed input is reported as corruption

use atlasdb::error::{AtlasError, Result};
use atlasdb::write_batch::{Handler, Record, WriteBatch, HEADER_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

/// Records every callback as a readable string
#[derive(Default)]
struct Recorder {
    seen: Vec<String>,
}

impl Handler for Recorder {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.seen.push(format!(
            "Put({cf}, {}, {})",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        ));
        Ok(())
    }

    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> Result<()> {
        self.seen.push(format!("Delete({cf}, {})", String::from_utf8_lossy(key)));
        Ok(())
    }

    fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.seen.push(format!(
            "Merge({cf}, {}, {})",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        ));
        Ok(())
    }

    fn log_data(&mut self, blob: &[u8]) {
        self.seen.push(format!("LogData({})", String::from_utf8_lossy(blob)));
    }
}

fn decode(batch: &WriteBatch) -> Vec<String> {
    let mut recorder = Recorder::default();
    batch.iterate(&mut recorder).unwrap();
    recorder.seen
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_empty_batch_is_header_only() {
    let batch = WriteBatch::new();
    assert_eq!(batch.byte_size(), HEADER_SIZE);
    assert_eq!(batch.count(), 0);
    assert_eq!(batch.sequence(), 0);
    assert!(batch.is_empty());
    assert!(decode(&batch).is_empty());
}

#[test]
fn test_header_layout_is_little_endian() {
    let mut batch = WriteBatch::new();
    batch.put(b"k", b"v");
    batch.set_sequence(0x0102_0304_0506_0708);

    let data = batch.data();
    assert_eq!(&data[..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&data[8..12], &[1, 0, 0, 0]);
}

#[test]
fn test_default_cf_records_use_plain_tags() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    assert_eq!(&batch.data()[HEADER_SIZE..], &[0x1, 1, b'a', 1, b'1']);
}

#[test]
fn test_cf_records_carry_varint_id() {
    let mut batch = WriteBatch::new();
    batch.delete_cf(300, b"b");
    // 300 = 0b1_0010_1100 -> 0xAC 0x02
    assert_eq!(&batch.data()[HEADER_SIZE..], &[0x4, 0xAC, 0x02, 1, b'b']);
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_put_delete_merge_decode_in_order() {
    let mut batch = WriteBatch::new();
    batch.put_cf(0, b"a", b"1");
    batch.delete_cf(2, b"b");
    batch.merge_cf(0, b"a", b"2");
    batch.set_sequence(100);

    assert_eq!(batch.count(), 3);
    assert_eq!(batch.sequence(), 100);
    assert_eq!(decode(&batch), vec!["Put(0, a, 1)", "Delete(2, b)", "Merge(0, a, 2)"]);
}

#[test]
fn test_records_iterator_borrows_batch() {
    let mut batch = WriteBatch::new();
    batch.put_cf(7, b"key", b"value");
    batch.delete(b"gone");

    let records: Vec<Record<'_>> = batch.records().collect::<Result<_>>().unwrap();
    assert_eq!(
        records,
        vec![
            Record::Put { cf: 7, key: b"key", value: b"value" },
            Record::Delete { cf: 0, key: b"gone" },
        ]
    );
}

#[test]
fn test_log_data_is_not_counted() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put_log_data(b"blob");
    batch.delete(b"a");

    assert_eq!(batch.count(), 2);
    assert_eq!(decode(&batch), vec!["Put(0, a, 1)", "LogData(blob)", "Delete(0, a)"]);
}

#[test]
fn test_from_bytes_roundtrip_keeps_header() {
    let mut batch = WriteBatch::new();
    batch.merge_cf(3, b"k", b"v");
    batch.set_sequence(42);

    let copy = WriteBatch::from_bytes(batch.data()).unwrap();
    assert_eq!(copy, batch);
    assert_eq!(copy.sequence(), 42);
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_sums_counts_and_keeps_order() {
    let mut first = WriteBatch::new();
    first.put(b"a", b"1");
    let mut second = WriteBatch::new();
    second.delete_cf(1, b"b");
    second.put_log_data(b"x");
    second.merge(b"c", b"3");
    second.set_sequence(999);

    first.append(&second);
    assert_eq!(first.count(), 3);
    assert_eq!(first.sequence(), 0);
    assert_eq!(
        decode(&first),
        vec!["Put(0, a, 1)", "Delete(1, b)", "LogData(x)", "Merge(0, c, 3)"]
    );
}

#[test]
fn test_clear_resets_batch() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.set_sequence(5);
    batch.clear();
    assert!(batch.is_empty());
    assert_eq!(batch.count(), 0);
    assert_eq!(batch.sequence(), 0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_too_small_is_corruption() {
    assert!(matches!(WriteBatch::from_bytes(&[0u8; 11]), Err(AtlasError::Corruption(_))));
}

#[test]
fn test_count_mismatch_is_corruption() {
    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.set_count(2);

    let mut recorder = Recorder::default();
    let err = batch.iterate(&mut recorder).unwrap_err();
    assert!(matches!(err, AtlasError::Corruption(_)));
    assert_eq!(recorder.seen, vec!["Put(0, a, 1)"]);
}

#[test]
fn test_unknown_tag_is_corruption() {
    let mut data = WriteBatch::new().data().to_vec();
    data.push(0x7f);
    let batch = WriteBatch::from_bytes(&data).unwrap();
    let mut records = batch.records();
    assert!(matches!(records.next(), Some(Err(AtlasError::Corruption(_)))));
    assert!(records.next().is_none());
}

#[test]
fn test_truncated_record_is_corruption() {
    let mut batch = WriteBatch::new();
    batch.put(b"key", b"value");
    let data = &batch.data()[..batch.byte_size() - 2];
    let truncated = WriteBatch::from_bytes(data).unwrap();
    assert!(matches!(
        truncated.iterate(&mut Recorder::default()),
        Err(AtlasError::Corruption(_))
    ));
}

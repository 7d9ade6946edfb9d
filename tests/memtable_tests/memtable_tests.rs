//! Tests for MemTable and MemTableList
//!
//! These tests verify:
//! - Versioned inserts and snapshot-bounded lookups
//! - Tombstones and merge operands seen through a lookup context
//! - Flush requests raised once the write buffer fills, claimed once
//! - Immutable list versions searched newest first
//! - Flush picking, rollback and in-order installation

use std::sync::Arc;
use std::thread;

use atlasdb::comparator::StringAppendOperator;
use atlasdb::lookup::GetContext;
use atlasdb::memtable::{FlushState, MemTable, MemTableList};
use atlasdb::types::{ValueType, MAX_SEQUENCE_NUMBER};
use atlasdb::version::FileMetaData;

// =============================================================================
// Helper Functions
// =============================================================================

fn lookup(mem: &MemTable, key: &[u8], snapshot: u64) -> Option<Vec<u8>> {
    let mut ctx = GetContext::new(key, snapshot, None);
    mem.get(&mut ctx);
    ctx.finish().unwrap()
}

fn table_file(number: u64) -> Arc<FileMetaData> {
    Arc::new(FileMetaData {
        number,
        file_size: 100,
        smallest: b"a".to_vec(),
        largest: b"z".to_vec(),
        smallest_seqno: 1,
        largest_seqno: 10,
        num_entries: 10,
    })
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let mem = MemTable::new(1, 1024);
    assert!(mem.is_empty());
    assert_eq!(mem.num_entries(), 0);
    assert_eq!(mem.first_sequence(), 0);
    assert_eq!(lookup(&mem, b"missing", MAX_SEQUENCE_NUMBER), None);
}

#[test]
fn test_newest_visible_version_wins() {
    let mem = MemTable::new(1, 1 << 20);
    mem.add(3, ValueType::Value, b"key", b"v3");
    mem.add(7, ValueType::Value, b"key", b"v7");
    mem.add(5, ValueType::Value, b"other", b"o5");

    assert_eq!(lookup(&mem, b"key", MAX_SEQUENCE_NUMBER), Some(b"v7".to_vec()));
    assert_eq!(lookup(&mem, b"key", 6), Some(b"v3".to_vec()));
    assert_eq!(lookup(&mem, b"key", 2), None);
    assert_eq!(mem.first_sequence(), 3);
    assert_eq!(mem.num_entries(), 3);
}

#[test]
fn test_tombstone_hides_older_value() {
    let mem = MemTable::new(1, 1 << 20);
    mem.add(1, ValueType::Value, b"key", b"value");
    mem.add(2, ValueType::Deletion, b"key", b"");

    assert_eq!(lookup(&mem, b"key", MAX_SEQUENCE_NUMBER), None);
    assert_eq!(lookup(&mem, b"key", 1), Some(b"value".to_vec()));
    assert_eq!(mem.num_deletes(), 1);
}

#[test]
fn test_merge_operands_collected_across_versions() {
    let mem = MemTable::new(1, 1 << 20);
    mem.add(1, ValueType::Value, b"key", b"a");
    mem.add(2, ValueType::Merge, b"key", b"b");
    mem.add(3, ValueType::Merge, b"key", b"c");

    let op = StringAppendOperator::new(b',');
    let mut ctx = GetContext::new(b"key", MAX_SEQUENCE_NUMBER, Some(&op));
    assert!(mem.get(&mut ctx));
    assert_eq!(ctx.finish().unwrap(), Some(b"a,b,c".to_vec()));
}

#[test]
fn test_entries_sorted_newest_first_per_key() {
    let mem = MemTable::new(1, 1 << 20);
    mem.add(1, ValueType::Value, b"b", b"1");
    mem.add(2, ValueType::Value, b"a", b"2");
    mem.add(3, ValueType::Value, b"b", b"3");

    let order: Vec<(Vec<u8>, u64)> = mem.entries().into_iter().map(|e| (e.user_key, e.sequence)).collect();
    assert_eq!(
        order,
        vec![(b"a".to_vec(), 2), (b"b".to_vec(), 3), (b"b".to_vec(), 1)]
    );
}

// =============================================================================
// Flush Trigger Tests
// =============================================================================

#[test]
fn test_full_memtable_requests_flush() {
    let mem = MemTable::new(1, 100);
    assert_eq!(mem.flush_state(), FlushState::NotRequested);
    mem.add(1, ValueType::Value, b"k1", &[0u8; 10]);
    assert!(!mem.should_schedule_flush());

    mem.add(2, ValueType::Value, b"k2", &[0u8; 80]);
    assert!(mem.approximate_memory_usage() >= 100);
    assert_eq!(mem.flush_state(), FlushState::Requested);
    assert!(mem.should_schedule_flush());
}

#[test]
fn test_flush_request_claimed_once() {
    let mem = Arc::new(MemTable::new(1, 64));
    mem.add(1, ValueType::Value, b"key", &[0u8; 64]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mem = Arc::clone(&mem);
            thread::spawn(move || mem.mark_flush_scheduled())
        })
        .collect();
    let claimed = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
    assert_eq!(claimed, 1);
    assert_eq!(mem.flush_state(), FlushState::Scheduled);
    assert!(!mem.should_schedule_flush());
}

#[test]
fn test_cannot_claim_before_request() {
    let mem = MemTable::new(1, 1 << 20);
    mem.add(1, ValueType::Value, b"key", b"small");
    assert!(!mem.mark_flush_scheduled());
    assert_eq!(mem.flush_state(), FlushState::NotRequested);
}

// =============================================================================
// Immutable List Tests
// =============================================================================

#[test]
fn test_list_version_searches_newest_first() {
    let mut list = MemTableList::new(1);
    let mut to_delete = Vec::new();
    let older = Arc::new(MemTable::new(1, 1 << 20));
    older.add(1, ValueType::Value, b"key", b"old");
    let newer = Arc::new(MemTable::new(2, 1 << 20));
    newer.add(2, ValueType::Value, b"key", b"new");

    list.add(Arc::clone(&older), &mut to_delete);
    list.add(Arc::clone(&newer), &mut to_delete);
    let version = list.current();
    let ids: Vec<u64> = version.memtables().iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec![2, 1]);

    let mut ctx = GetContext::new(b"key", MAX_SEQUENCE_NUMBER, None);
    assert!(version.get(&mut ctx));
    assert_eq!(ctx.finish().unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_superseded_list_version_releases_nothing_still_listed() {
    let mut list = MemTableList::new(1);
    let mut to_delete = Vec::new();
    let mem = Arc::new(MemTable::new(1, 1024));
    list.add(Arc::clone(&mem), &mut to_delete);
    assert_eq!(mem.refs(), 1);

    list.add(Arc::new(MemTable::new(2, 1024)), &mut to_delete);
    assert!(to_delete.is_empty());
    assert_eq!(mem.refs(), 1);
}

#[test]
fn test_pick_returns_oldest_first_and_skips_in_progress() {
    let mut list = MemTableList::new(1);
    let mut to_delete = Vec::new();
    list.add(Arc::new(MemTable::new(1, 1024)), &mut to_delete);
    list.add(Arc::new(MemTable::new(2, 1024)), &mut to_delete);

    let picked: Vec<u64> = list.pick_memtables_to_flush().iter().map(|m| m.id()).collect();
    assert_eq!(picked, vec![1, 2]);
    assert!(!list.is_flush_pending());

    list.add(Arc::new(MemTable::new(3, 1024)), &mut to_delete);
    let picked: Vec<u64> = list.pick_memtables_to_flush().iter().map(|m| m.id()).collect();
    assert_eq!(picked, vec![3]);
}

#[test]
fn test_failed_flush_rolls_back() {
    let mut list = MemTableList::new(1);
    let mut to_delete = Vec::new();
    list.add(Arc::new(MemTable::new(1, 1024)), &mut to_delete);
    let picked = list.pick_memtables_to_flush();
    assert!(picked[0].flush_in_progress());

    list.rollback_memtable_flush(&picked);
    assert!(!picked[0].flush_in_progress());
    assert!(list.is_flush_pending());
    assert_eq!(list.num_not_flushed(), 1);
}

#[test]
fn test_install_retires_completed_prefix() {
    let mut list = MemTableList::new(1);
    let mut to_delete = Vec::new();
    list.add(Arc::new(MemTable::new(1, 1024)), &mut to_delete);
    list.add(Arc::new(MemTable::new(2, 1024)), &mut to_delete);
    let picked = list.pick_memtables_to_flush();

    let removed = list.install_memtable_flush_results(&picked, Some(table_file(9)), &mut to_delete);
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|m| m.flush_completed()));
    assert_eq!(list.num_not_flushed(), 0);
    assert_eq!(to_delete.len(), 2);
}

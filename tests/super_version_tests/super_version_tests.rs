//! Tests for SuperVersion and the thread-local super version cache
//!
//! These tests verify:
//! - Teardown is split into a locked prepare and an unlocked finish
//! - Exactly one caller observes the last reference
//! - A thread reuses its cached super version until a new one is installed
//! - Installing marks every thread's cache stale and releases what it held

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;

use atlasdb::column_family::ColumnFamilyData;
use atlasdb::comparator::BytewiseComparator;
use atlasdb::memtable::{MemTable, MemTableList};
use atlasdb::options::ColumnFamilyOptions;
use atlasdb::super_version::SuperVersion;
use atlasdb::version::Version;
use atlasdb::write_controller::WriteController;

// =============================================================================
// Helper Functions
// =============================================================================

fn super_version(mem: &Arc<MemTable>, list: &MemTableList) -> Arc<SuperVersion> {
    SuperVersion::new(
        Arc::clone(mem),
        list.current(),
        Arc::new(Version::new(7, Arc::new(BytewiseComparator))),
        Arc::new(ColumnFamilyOptions::default()),
        1,
    )
}

fn column_family() -> Arc<ColumnFamilyData> {
    ColumnFamilyData::new(
        0,
        "default",
        ColumnFamilyOptions::default(),
        1,
        Arc::new(WriteController::new(1)),
        Arc::new(AtomicU64::new(0)),
    )
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_release_frees_unshared_memtable() {
    let mem = Arc::new(MemTable::new(1, 1024));
    let list = MemTableList::new(1);
    let sv = super_version(&mem, &list);
    assert_eq!(mem.refs(), 1);

    assert!(sv.unref());
    assert_eq!(sv.prepare_release(), vec![1]);
    assert!(sv.is_released());
    assert_eq!(mem.refs(), 0);

    assert_eq!(sv.finish_release(), vec![1]);
    assert!(sv.finish_release().is_empty());
}

#[test]
fn test_release_keeps_memtable_held_elsewhere() {
    let mem = Arc::new(MemTable::new(1, 1024));
    mem.ref_();
    let list = MemTableList::new(1);
    let sv = super_version(&mem, &list);
    let list_version = list.current();
    assert_eq!(list_version.refs(), 2);

    assert!(sv.unref());
    assert!(sv.prepare_release().is_empty());
    assert!(sv.finish_release().is_empty());
    assert_eq!(mem.refs(), 1);
    assert_eq!(list_version.refs(), 1);
}

#[test]
fn test_concurrent_unref_sees_zero_once() {
    let mem = Arc::new(MemTable::new(1, 1024));
    let list = MemTableList::new(1);
    let sv = super_version(&mem, &list);
    let holders = 16;
    for _ in 1..holders {
        sv.ref_();
    }

    let barrier = Arc::new(Barrier::new(holders));
    let last = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..holders)
        .map(|_| {
            let sv = Arc::clone(&sv);
            let barrier = Arc::clone(&barrier);
            let last = Arc::clone(&last);
            thread::spawn(move || {
                barrier.wait();
                if sv.unref() {
                    last.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(last.load(Ordering::SeqCst), 1);
    assert_eq!(sv.refs(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any interleaving of ref and unref reports the last reference exactly
    /// when the count reaches zero.
    #[test]
    fn prop_last_reference_reported_once(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
        let mem = Arc::new(MemTable::new(1, 1024));
        let list = MemTableList::new(1);
        let sv = super_version(&mem, &list);
        let mut held = 1u32;
        let mut zero_seen = 0;

        for take in ops {
            if held == 0 {
                break;
            }
            if take {
                sv.ref_();
                held += 1;
            } else {
                held -= 1;
                if sv.unref() {
                    zero_seen += 1;
                    prop_assert_eq!(held, 0);
                }
            }
            prop_assert_eq!(sv.refs(), held);
        }
        while held > 0 {
            held -= 1;
            if sv.unref() {
                zero_seen += 1;
            }
        }
        prop_assert_eq!(zero_seen, 1);

        let prepared = sv.prepare_release();
        let finished = sv.finish_release();
        prop_assert_eq!(prepared, finished);
    }
}

// =============================================================================
// Thread-Local Cache Tests
// =============================================================================

#[test]
fn test_cached_super_version_is_reused() {
    let cfd = column_family();
    let db_mutex = Mutex::new(());

    let first = cfd.get_thread_local_super_version(&db_mutex);
    let pinned = Arc::clone(&first);
    assert_eq!(first.version_number, 1);
    assert_eq!(first.refs(), 2);
    assert!(cfd.return_thread_local_super_version(first, &db_mutex));

    let again = cfd.get_thread_local_super_version(&db_mutex);
    assert!(Arc::ptr_eq(&again, &pinned));
    assert_eq!(again.refs(), 2);
    assert!(cfd.return_thread_local_super_version(again, &db_mutex));
}

#[test]
fn test_install_while_in_use_releases_on_return() {
    let cfd = column_family();
    let db_mutex = Mutex::new(());

    let sv = cfd.get_thread_local_super_version(&db_mutex);
    let pinned = Arc::clone(&sv);
    assert!(cfd.install_super_version().is_none());
    assert_eq!(cfd.super_version_number(), 2);

    // The slot went stale while the read was running.
    assert!(!cfd.return_thread_local_super_version(sv, &db_mutex));
    assert!(pinned.is_released());

    let fresh = cfd.get_thread_local_super_version(&db_mutex);
    assert_eq!(fresh.version_number, 2);
    assert!(cfd.return_thread_local_super_version(fresh, &db_mutex));
}

#[test]
fn test_install_drops_cached_references() {
    let cfd = column_family();
    let db_mutex = Mutex::new(());

    let sv = cfd.get_thread_local_super_version(&db_mutex);
    assert!(cfd.return_thread_local_super_version(sv, &db_mutex));

    let old = cfd.install_super_version().expect("old super version released");
    assert_eq!(old.version_number, 1);
    assert!(old.is_released());
    old.finish_release();
}

#[test]
fn test_install_reaches_other_threads_caches() {
    let cfd = column_family();
    let db_mutex = Arc::new(Mutex::new(()));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cfd = Arc::clone(&cfd);
            let db_mutex = Arc::clone(&db_mutex);
            thread::spawn(move || {
                let sv = cfd.get_thread_local_super_version(&db_mutex);
                assert_eq!(sv.version_number, 1);
                assert!(cfd.return_thread_local_super_version(sv, &db_mutex));
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    // Four cached references plus the family's own.
    let old = cfd.install_super_version().expect("every cached reference dropped");
    assert_eq!(old.refs(), 0);
    old.finish_release();
    assert_eq!(cfd.super_version_number(), 2);
}

#[test]
fn test_referenced_super_version_is_current() {
    let cfd = column_family();
    let db_mutex = Mutex::new(());

    let held = cfd.get_referenced_super_version(&db_mutex);
    assert_eq!(held.version_number, 1);
    cfd.install_super_version();
    assert!(!held.is_released());

    assert!(held.unref());
    held.prepare_release();
    held.finish_release();
    assert_eq!(cfd.get_referenced_super_version(&db_mutex).version_number, 2);
}

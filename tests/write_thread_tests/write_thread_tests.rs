//! Tests for WriteThread
//!
//! These tests verify:
//! - The first writer into an empty queue leads, later writers wait
//! - A leader absorbs compatible followers and stops at the first misfit
//! - Followers are completed with the leader's status exactly once
//! - Every queued writer is written in exactly one round
//! - Writers with and without the log never share a group

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use atlasdb::error::AtlasError;
use atlasdb::write_batch::{Record, WriteBatch};
use atlasdb::write_thread::{JoinOutcome, WriteGroup, WriteThread, Writer};
use proptest::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn writer(key: &[u8], sync: bool, disable_wal: bool) -> Arc<Writer> {
    let mut batch = WriteBatch::new();
    batch.put(key, b"v");
    Writer::new(Some(batch), sync, disable_wal, false)
}

/// Spin until `w` is the newest queued writer
fn wait_until_newest(wt: &WriteThread, w: &Arc<Writer>) {
    loop {
        if let Some(newest) = wt.newest_writer() {
            if Arc::ptr_eq(&newest, w) {
                return;
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Join on a new thread once the calling thread has queued it
fn spawn_joiner(wt: &Arc<WriteThread>, w: &Arc<Writer>) -> thread::JoinHandle<JoinOutcome> {
    let (wt, w) = (Arc::clone(wt), Arc::clone(w));
    thread::spawn(move || wt.join_batch_group(&w))
}

fn group_keys(group: &WriteGroup) -> Vec<Vec<u8>> {
    group
        .batches()
        .flat_map(|batch| {
            batch
                .records()
                .map(|record| match record.unwrap() {
                    Record::Put { key, .. } => key.to_vec(),
                    other => panic!("unexpected record {other:?}"),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Full writer protocol: join, and if leading, commit a group and record it.
fn run_writer(wt: &WriteThread, w: &Arc<Writer>, rounds: &Mutex<Vec<Vec<Vec<u8>>>>) {
    if wt.join_batch_group(w) == JoinOutcome::Completed {
        assert!(w.status().is_ok());
        return;
    }
    let group = wt.enter_as_batch_group_leader(w);
    let leader = group.leader();
    for member in group.members() {
        assert_eq!(member.disable_wal(), leader.disable_wal());
        assert!(!member.sync() || leader.sync());
        assert!(member.in_batch_group());
    }
    rounds.lock().unwrap().push(group_keys(&group));
    wt.exit_as_batch_group_leader(&group, &Ok(()));
}

// =============================================================================
// Group Formation Tests
// =============================================================================

#[test]
fn test_leader_absorbs_matching_writer_and_skips_wal_disabled_one() {
    let wt = Arc::new(WriteThread::new());

    // B finds the queue empty and leads.
    let b = writer(b"b", false, false);
    assert_eq!(wt.join_batch_group(&b), JoinOutcome::Leader);

    // C (log enabled) queues before A (log disabled).
    let c = writer(b"c", false, false);
    let c_thread = spawn_joiner(&wt, &c);
    wait_until_newest(&wt, &c);
    let a = writer(b"a", false, true);
    let a_thread = spawn_joiner(&wt, &a);
    wait_until_newest(&wt, &a);

    let group = wt.enter_as_batch_group_leader(&b);
    assert_eq!(group_keys(&group), vec![b"b".to_vec(), b"c".to_vec()]);
    assert!(!a.in_batch_group());
    wt.exit_as_batch_group_leader(&group, &Ok(()));

    assert_eq!(c_thread.join().unwrap(), JoinOutcome::Completed);
    assert!(c.status().is_ok());

    // A leads the next round on its own.
    assert_eq!(a_thread.join().unwrap(), JoinOutcome::Leader);
    let group = wt.enter_as_batch_group_leader(&a);
    assert_eq!(group_keys(&group), vec![b"a".to_vec()]);
    wt.exit_as_batch_group_leader(&group, &Ok(()));
    assert!(wt.newest_writer().is_none());
}

#[test]
fn test_callback_writer_is_never_absorbed() {
    let wt = Arc::new(WriteThread::new());
    let leader = writer(b"l", false, false);
    assert_eq!(wt.join_batch_group(&leader), JoinOutcome::Leader);

    let mut batch = WriteBatch::new();
    batch.put(b"cb", b"v");
    let with_callback = Writer::new(Some(batch), false, false, true);
    let handle = spawn_joiner(&wt, &with_callback);
    wait_until_newest(&wt, &with_callback);

    let group = wt.enter_as_batch_group_leader(&leader);
    assert_eq!(group.len(), 1);
    wt.exit_as_batch_group_leader(&group, &Ok(()));

    assert_eq!(handle.join().unwrap(), JoinOutcome::Leader);
    let group = wt.enter_as_batch_group_leader(&with_callback);
    wt.exit_as_batch_group_leader(&group, &Ok(()));
}

#[test]
fn test_followers_receive_leader_status() {
    let wt = Arc::new(WriteThread::new());
    let leader = writer(b"l", true, false);
    assert_eq!(wt.join_batch_group(&leader), JoinOutcome::Leader);

    let followers: Vec<_> = (0..3).map(|i| writer(&[i], i % 2 == 0, false)).collect();
    let handles: Vec<_> = followers
        .iter()
        .map(|f| {
            let handle = spawn_joiner(&wt, f);
            wait_until_newest(&wt, f);
            handle
        })
        .collect();

    let group = wt.enter_as_batch_group_leader(&leader);
    assert_eq!(group.len(), 4);
    assert!(group.needs_sync());
    let status = Err(AtlasError::Corruption("log write failed".to_string()));
    wt.exit_as_batch_group_leader(&group, &status);

    for (handle, follower) in handles.into_iter().zip(&followers) {
        assert_eq!(handle.join().unwrap(), JoinOutcome::Completed);
        assert!(matches!(follower.status(), Err(AtlasError::Corruption(_))));
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_every_writer_written_exactly_once() {
    let wt = Arc::new(WriteThread::new());
    let rounds = Arc::new(Mutex::new(Vec::new()));
    let num_threads = 8;
    let writes_per_thread = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let wt = Arc::clone(&wt);
            let rounds = Arc::clone(&rounds);
            thread::spawn(move || {
                for i in 0..writes_per_thread {
                    let key = format!("{t}-{i}");
                    let w = writer(key.as_bytes(), i % 7 == 0, false);
                    run_writer(&wt, &w, &rounds);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rounds = rounds.lock().unwrap();
    let mut seen = HashSet::new();
    for key in rounds.iter().flatten() {
        assert!(seen.insert(key.clone()), "key written twice");
    }
    assert_eq!(seen.len(), num_threads * writes_per_thread);
    assert!(rounds.len() <= num_threads * writes_per_thread);
    assert!(wt.newest_writer().is_none());
}

#[test]
fn test_unbatched_writer_excludes_groups() {
    let wt = Arc::new(WriteThread::new());
    let lock = Arc::new(parking_lot::Mutex::new(0u32));

    let leader = writer(b"l", false, false);
    assert_eq!(wt.join_batch_group(&leader), JoinOutcome::Leader);

    let unbatched_thread = {
        let (wt, lock) = (Arc::clone(&wt), Arc::clone(&lock));
        thread::spawn(move || {
            let w = Writer::new(None, false, false, false);
            let mut guard = lock.lock();
            wt.enter_unbatched(&w, &mut guard);
            *guard += 1;
            wt.exit_unbatched(&w);
        })
    };
    // The unbatched writer queues while holding, then releasing, the lock.
    loop {
        if let Some(newest) = wt.newest_writer() {
            if !Arc::ptr_eq(&newest, &leader) {
                break;
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(*lock.lock(), 0);

    let group = wt.enter_as_batch_group_leader(&leader);
    assert_eq!(group.len(), 1);
    wt.exit_as_batch_group_leader(&group, &Ok(()));

    unbatched_thread.join().unwrap();
    assert_eq!(*lock.lock(), 1);
    assert!(wt.newest_writer().is_none());
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_wal_modes_never_share_a_group(flags in prop::collection::vec((any::<bool>(), any::<bool>()), 1..8)) {
        let wt = Arc::new(WriteThread::new());
        let rounds = Arc::new(Mutex::new(Vec::new()));

        let (first_sync, first_no_wal) = flags[0];
        let first = writer(b"0", first_sync, first_no_wal);
        prop_assert_eq!(wt.join_batch_group(&first), JoinOutcome::Leader);

        let mut handles = Vec::new();
        for (i, (sync, no_wal)) in flags.iter().enumerate().skip(1) {
            let w = writer(i.to_string().as_bytes(), *sync, *no_wal);
            let (wt2, rounds2, w2) = (Arc::clone(&wt), Arc::clone(&rounds), Arc::clone(&w));
            handles.push(thread::spawn(move || run_writer(&wt2, &w2, &rounds2)));
            wait_until_newest(&wt, &w);
        }

        let group = wt.enter_as_batch_group_leader(&first);
        for member in group.members() {
            prop_assert_eq!(member.disable_wal(), first_no_wal);
            prop_assert!(!member.sync() || first_sync);
        }
        rounds.lock().unwrap().push(group_keys(&group));
        wt.exit_as_batch_group_leader(&group, &Ok(()));

        for handle in handles {
            handle.join().unwrap();
        }
        let total: usize = rounds.lock().unwrap().iter().map(Vec::len).sum();
        prop_assert_eq!(total, flags.len());
    }
}

//! Write Thread Module
//!
//! Group commit for concurrent writers.
//!
//! ## Responsibilities
//! - Queue writers on a lock-free stack
//! - Elect the writer that finds the queue empty as group leader
//! - Let the leader absorb compatible followers into one write group
//! - Complete followers with the leader's status and hand leadership on
//!
//! ## Writer Queue
//! ```text
//!   newest_writer ──> W5 ──older──> W4 ──older──> W3 ──older──> W2 (leader)
//!                        <─newer──     <─newer──     <─newer──
//!
//!   link_older  set by each writer before it publishes itself (strong)
//!   link_newer  filled in lazily by the leader, newest to oldest (weak)
//! ```
//! A writer pushes itself with a compare-and-swap on `newest_writer`. If
//! the slot was empty it is the leader; otherwise it parks until the leader
//! of a group either completes it or promotes it to leader.
//!
//! ## Group Rules
//! Walking newer from the leader, a candidate ends the group if it wants a
//! sync the leader does not do, disagrees on WAL use, carries a callback (or
//! the leader does), has no batch, or pushes the group past its size cap.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, Thread};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::write_batch::WriteBatch;

/// Leaders writing at most this much absorb up to this much more
const SMALL_GROUP_THRESHOLD: usize = 128 << 10;

/// Size cap once the leader alone exceeds the small threshold
const MAX_GROUP_SIZE: usize = 1 << 20;

/// Writer states. A parked writer waits for leadership or completion.
pub const STATE_INIT: u8 = 1;
pub const STATE_GROUP_LEADER: u8 = 2;
pub const STATE_COMPLETED: u8 = 4;

// =============================================================================
// Writer
// =============================================================================

/// One pending write. Lives on the writer's stack frame for the duration of
/// the write; shared with the queue through `Arc`.
pub struct Writer {
    batch: Option<WriteBatch>,
    sync: bool,
    disable_wal: bool,
    has_callback: bool,
    in_batch_group: AtomicBool,
    state: AtomicU8,
    status: Mutex<Result<()>>,
    thread: OnceLock<Thread>,
    link_older: Mutex<Option<Arc<Writer>>>,
    link_newer: Mutex<Option<Weak<Writer>>>,
}

impl Writer {
    /// A writer without a batch is never absorbed into another group.
    pub fn new(batch: Option<WriteBatch>, sync: bool, disable_wal: bool, has_callback: bool) -> Arc<Self> {
        Arc::new(Self {
            batch,
            sync,
            disable_wal,
            has_callback,
            in_batch_group: AtomicBool::new(false),
            state: AtomicU8::new(STATE_INIT),
            status: Mutex::new(Ok(())),
            thread: OnceLock::new(),
            link_older: Mutex::new(None),
            link_newer: Mutex::new(None),
        })
    }

    pub fn batch(&self) -> Option<&WriteBatch> {
        self.batch.as_ref()
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn disable_wal(&self) -> bool {
        self.disable_wal
    }

    pub fn has_callback(&self) -> bool {
        self.has_callback
    }

    pub fn in_batch_group(&self) -> bool {
        self.in_batch_group.load(Ordering::Acquire)
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Status set by the leader that completed this writer
    pub fn status(&self) -> Result<()> {
        self.status.lock().clone()
    }

    fn newer(&self) -> Option<Arc<Writer>> {
        self.link_newer.lock().as_ref().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("sync", &self.sync)
            .field("disable_wal", &self.disable_wal)
            .field("has_callback", &self.has_callback)
            .field("state", &self.state())
            .field("batch_size", &self.batch.as_ref().map(WriteBatch::byte_size))
            .finish()
    }
}

/// How [`WriteThread::join_batch_group`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller leads a group and must perform the write
    Leader,
    /// Another leader wrote the caller's batch; see [`Writer::status`]
    Completed,
}

// =============================================================================
// Write Group
// =============================================================================

/// Writers a leader commits together, oldest (the leader) first.
#[derive(Debug)]
pub struct WriteGroup {
    members: Vec<Arc<Writer>>,
    size: usize,
}

impl WriteGroup {
    pub fn leader(&self) -> &Arc<Writer> {
        &self.members[0]
    }

    pub fn last_writer(&self) -> &Arc<Writer> {
        &self.members[self.members.len() - 1]
    }

    pub fn members(&self) -> &[Arc<Writer>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Total encoded size of the group's batches
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn batches(&self) -> impl Iterator<Item = &WriteBatch> {
        self.members.iter().filter_map(|w| w.batch())
    }

    pub fn needs_sync(&self) -> bool {
        self.members.iter().any(|w| w.sync)
    }

    pub fn disable_wal(&self) -> bool {
        self.leader().disable_wal
    }
}

// =============================================================================
// Write Thread
// =============================================================================

#[derive(Default)]
pub struct WriteThread {
    newest_writer: ArcSwapOption<Writer>,
}

impl WriteThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently queued writer, if any
    pub fn newest_writer(&self) -> Option<Arc<Writer>> {
        self.newest_writer.load_full()
    }

    /// Queue `w` and block until it leads a group or has been written.
    pub fn join_batch_group(&self, w: &Arc<Writer>) -> JoinOutcome {
        if self.link_one(w) {
            w.state.store(STATE_GROUP_LEADER, Ordering::Release);
            return JoinOutcome::Leader;
        }
        match self.await_state(w, STATE_GROUP_LEADER | STATE_COMPLETED) {
            STATE_COMPLETED => JoinOutcome::Completed,
            _ => JoinOutcome::Leader,
        }
    }

    /// Form the leader's group from the writers queued behind it.
    pub fn enter_as_batch_group_leader(&self, leader: &Arc<Writer>) -> WriteGroup {
        debug_assert_eq!(leader.state(), STATE_GROUP_LEADER);
        let mut size = leader.batch().map_or(0, WriteBatch::byte_size);
        let max_size = if size <= SMALL_GROUP_THRESHOLD {
            size + SMALL_GROUP_THRESHOLD
        } else {
            MAX_GROUP_SIZE
        };

        leader.in_batch_group.store(true, Ordering::Release);
        let mut members = vec![Arc::clone(leader)];

        let Some(newest) = self.newest_writer.load_full() else {
            return WriteGroup { members, size };
        };
        Self::create_missing_newer_links(&newest);

        let mut w = Arc::clone(leader);
        while !Arc::ptr_eq(&w, &newest) {
            let Some(next) = w.newer() else {
                break;
            };
            w = next;

            if w.sync && !leader.sync {
                break;
            }
            if w.disable_wal != leader.disable_wal {
                break;
            }
            if w.has_callback || leader.has_callback {
                break;
            }
            let Some(batch) = w.batch() else {
                break;
            };
            let grown = size + batch.byte_size();
            if grown > max_size {
                break;
            }

            size = grown;
            w.in_batch_group.store(true, Ordering::Release);
            members.push(Arc::clone(&w));
        }

        WriteGroup { members, size }
    }

    /// Hand leadership to the next queued writer, then complete every
    /// follower of the group with `status`.
    pub fn exit_as_batch_group_leader(&self, group: &WriteGroup, status: &Result<()>) {
        self.hand_off_leadership(group.last_writer());

        for w in group.members().iter().skip(1).rev() {
            *w.status.lock() = status.clone();
            Self::set_state(w, STATE_COMPLETED);
        }
    }

    /// Become the only active writer, waiting for leadership with `guard`
    /// released. On return the caller is leader and holds the lock again;
    /// no group write runs until [`exit_unbatched`](Self::exit_unbatched).
    pub fn enter_unbatched<T>(&self, w: &Arc<Writer>, guard: &mut MutexGuard<'_, T>) {
        debug_assert!(w.batch().is_none());
        if self.link_one(w) {
            w.state.store(STATE_GROUP_LEADER, Ordering::Release);
            return;
        }
        MutexGuard::unlocked(guard, || {
            self.await_state(w, STATE_GROUP_LEADER);
        });
    }

    pub fn exit_unbatched(&self, w: &Arc<Writer>) {
        self.hand_off_leadership(w);
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Push `w` onto the queue. True if it found the queue empty.
    fn link_one(&self, w: &Arc<Writer>) -> bool {
        let _ = w.thread.set(thread::current());
        loop {
            let head = self.newest_writer.load_full();
            *w.link_older.lock() = head.clone();
            let prev = self.newest_writer.compare_and_swap(&head, Some(Arc::clone(w)));
            if same_writer(&prev, &head) {
                return head.is_none();
            }
        }
    }

    /// Fill `link_newer` from `head` down to the first writer already linked.
    fn create_missing_newer_links(head: &Arc<Writer>) {
        let mut current = Arc::clone(head);
        loop {
            let Some(next) = current.link_older.lock().clone() else {
                break;
            };
            {
                let mut newer = next.link_newer.lock();
                if newer.is_some() {
                    break;
                }
                *newer = Some(Arc::downgrade(&current));
            }
            current = next;
        }
    }

    /// Empty the queue if `last_writer` is still newest, else promote the
    /// writer right after it.
    fn hand_off_leadership(&self, last_writer: &Arc<Writer>) {
        let head = Some(Arc::clone(last_writer));
        let prev = self.newest_writer.compare_and_swap(&head, None::<Arc<Writer>>);
        if same_writer(&prev, &head) {
            return;
        }

        // Someone queued behind the group; the slot cannot be empty now.
        if let Some(newest) = self.newest_writer.load_full() {
            Self::create_missing_newer_links(&newest);
        }
        if let Some(next) = last_writer.newer() {
            *next.link_older.lock() = None;
            Self::set_state(&next, STATE_GROUP_LEADER);
        }
    }

    fn set_state(w: &Writer, state: u8) {
        w.state.store(state, Ordering::Release);
        if let Some(thread) = w.thread.get() {
            thread.unpark();
        }
    }

    /// Park until the writer's state matches `mask`. Returns that state.
    fn await_state(&self, w: &Writer, mask: u8) -> u8 {
        loop {
            let state = w.state.load(Ordering::Acquire);
            if state & mask != 0 {
                return state;
            }
            thread::park();
        }
    }
}

impl std::fmt::Debug for WriteThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteThread")
            .field("idle", &self.newest_writer.load().is_none())
            .finish()
    }
}

fn same_writer(a: &Option<Arc<Writer>>, b: &Option<Arc<Writer>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

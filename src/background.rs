//! Background Module
//!
//! Worker pools for flushes and compactions, and the sticky background error.
//!
//! ## Background Error
//! The first non-transient failure of a background job or of the write
//! path is recorded once and never replaced. Every later write fails with
//! it, and background scheduling stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{AtlasError, Result};

// =============================================================================
// Sticky Background Error
// =============================================================================

#[derive(Debug, Default)]
pub struct BackgroundError {
    cell: ArcSwapOption<AtlasError>,
}

impl BackgroundError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an error is already recorded or `err` is
    /// transient. Returns true if `err` was recorded.
    pub fn set_if_unset(&self, err: &AtlasError) -> bool {
        if err.is_transient() {
            return false;
        }
        let prev = self
            .cell
            .compare_and_swap(&None::<Arc<AtlasError>>, Some(Arc::new(err.clone())));
        if prev.is_none() {
            error!(error = %err, "background error recorded, writes are now rejected");
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> Option<AtlasError> {
        self.cell.load_full().map(|err| (*err).clone())
    }

    pub fn is_set(&self) -> bool {
        self.cell.load().is_some()
    }

    /// `Err` with the recorded error, if any
    pub fn check(&self) -> Result<()> {
        match self.get() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads draining a job queue.
pub struct BackgroundPool {
    name: String,
    sender: Sender<Option<Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl BackgroundPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Option<Job>>();
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let receiver: Receiver<Option<Job>> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("atlas-{name}-{i}"))
                .spawn(move || {
                    while let Ok(Some(job)) = receiver.recv() {
                        job();
                    }
                })?;
            handles.push(handle);
        }
        debug!(pool = name, threads = handles.len(), "background pool started");
        Ok(Self {
            name: name.to_string(),
            sender,
            handles: Mutex::new(handles),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue `job`. Returns false once the pool is shut down.
    pub fn schedule<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        self.sender.send(Some(Box::new(job))).is_ok()
    }

    /// Let queued jobs finish, then stop and join every thread.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for _ in 0..handles.len() {
            let _ = self.sender.send(None);
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!(pool = %self.name, "background thread panicked");
            }
        }
        info!(pool = %self.name, "background pool stopped");
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("name", &self.name)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

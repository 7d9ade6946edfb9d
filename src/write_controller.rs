//! Write Controller Module
//!
//! Global backpressure gate shared by every column family.
//!
//! ## Responsibilities
//! - Count outstanding stop and delay conditions through RAII tokens
//! - Meter delayed writes with a token bucket refilled at a fixed rate
//!
//! A column family that falls behind holds a [`StopWriteToken`] (writes
//! wait) or a [`DelayWriteToken`] (writes are paced) until its write stall
//! condition is recalculated. Dropping the token lifts the condition.
//!
//! ## Token Bucket
//! ```text
//!   refill = (now - last_refill_time) * rate      (only when now is later)
//!   enough bytes  -> take them, no delay
//!   short by d    -> delay = ceil(d / rate), last_refill_time += delay
//! ```
//! Pushing `last_refill_time` forward by the granted delay means a second
//! caller at the same instant queues behind the first instead of being
//! granted the same slot.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Largest refill credited at once, in microseconds of accumulated rate
const MAX_REFILL_MICROS: u64 = 1_000_000;

#[derive(Debug)]
struct Bucket {
    rate: u64,
    bytes_left: u64,
    last_refill_time: u64,
}

#[derive(Debug)]
pub struct WriteController {
    total_stopped: AtomicI32,
    total_delayed: AtomicI32,
    bucket: Mutex<Bucket>,
}

impl WriteController {
    /// `delayed_write_rate` is in bytes per microsecond; zero is raised to one.
    pub fn new(delayed_write_rate: u64) -> Self {
        Self {
            total_stopped: AtomicI32::new(0),
            total_delayed: AtomicI32::new(0),
            bucket: Mutex::new(Bucket {
                rate: delayed_write_rate.max(1),
                bytes_left: 0,
                last_refill_time: 0,
            }),
        }
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    pub fn get_stop_token(self: &Arc<Self>) -> StopWriteToken {
        self.total_stopped.fetch_add(1, Ordering::AcqRel);
        StopWriteToken {
            controller: Arc::clone(self),
        }
    }

    pub fn get_delay_token(self: &Arc<Self>) -> DelayWriteToken {
        self.total_delayed.fetch_add(1, Ordering::AcqRel);
        DelayWriteToken {
            controller: Arc::clone(self),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.total_stopped.load(Ordering::Acquire) > 0
    }

    pub fn needs_delay(&self) -> bool {
        self.total_delayed.load(Ordering::Acquire) > 0
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    /// Microseconds a writer of `num_bytes` should sleep at time `now`.
    pub fn get_delay(&self, now: u64, num_bytes: u64) -> u64 {
        let mut bucket = self.bucket.lock();
        if now > bucket.last_refill_time {
            let elapsed = (now - bucket.last_refill_time).min(MAX_REFILL_MICROS);
            let refill = elapsed.saturating_mul(bucket.rate);
            let ceiling = MAX_REFILL_MICROS.saturating_mul(bucket.rate);
            bucket.bytes_left = bucket.bytes_left.saturating_add(refill).min(ceiling);
            bucket.last_refill_time = now;
        }

        if bucket.bytes_left >= num_bytes {
            bucket.bytes_left -= num_bytes;
            return 0;
        }

        let deficit = num_bytes - bucket.bytes_left;
        let delay = deficit.div_ceil(bucket.rate);
        // The refill earned while sleeping is spent on this write up front:
        // `last_refill_time` moves past the sleep, and only the surplus from
        // rounding the delay up stays in the bucket. The bucket is not left
        // empty with the refill still to come, so a writer that calls again
        // right after its sleep is charged for its new bytes, and a second
        // call at the same `now` queues behind the first delay.
        bucket.bytes_left = delay.saturating_mul(bucket.rate).saturating_sub(deficit);
        bucket.last_refill_time = bucket.last_refill_time.saturating_add(delay);
        bucket.last_refill_time - now
    }

    pub fn set_delayed_write_rate(&self, rate: u64) {
        self.bucket.lock().rate = rate.max(1);
    }

    pub fn delayed_write_rate(&self) -> u64 {
        self.bucket.lock().rate
    }
}

/// Keeps writes stopped while alive
#[derive(Debug)]
pub struct StopWriteToken {
    controller: Arc<WriteController>,
}

impl Drop for StopWriteToken {
    fn drop(&mut self) {
        let prev = self.controller.total_stopped.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

/// Keeps writes delayed while alive
#[derive(Debug)]
pub struct DelayWriteToken {
    controller: Arc<WriteController>,
}

impl Drop for DelayWriteToken {
    fn drop(&mut self) {
        let prev = self.controller.total_delayed.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

/// Write stall condition a column family currently imposes
#[derive(Debug)]
pub enum WriteStallToken {
    Stop(StopWriteToken),
    Delay(DelayWriteToken),
}

impl WriteStallToken {
    pub fn is_stop(&self) -> bool {
        matches!(self, WriteStallToken::Stop(_))
    }
}

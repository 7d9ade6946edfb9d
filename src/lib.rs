//! # AtlasDB
//!
//! The concurrent write path of a log-structured merge-tree engine:
//! - Group commit: one leader logs and applies the batches of many writers
//! - Column families with refcounted super versions and per-thread caching
//! - Memtable switching, background flushes and leveled compaction
//! - Write stalls metered by a shared token bucket
//! - A sticky background error that fences off later writes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Writers (many threads)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ join_batch_group
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Write Thread                            │
//! │        (leader merges followers into one group)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐      full      ┌─────────────────┐
//!   │     WAL     │          │  MemTables  │ ─────────────> │ Flush Scheduler │
//!   │  (Append)   │          │ (per CF)    │                └────────┬────────┘
//!   └─────────────┘          └──────┬──────┘                         │
//!                                   │ switch, flush, compact         │
//!                                   ▼                                │
//!                           ┌───────────────┐ <──────────────────────┘
//!                           │ Super Version │  readers (thread-local)
//!                           │   + Version   │
//!                           └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod options;

pub mod types;
pub mod clock;
pub mod comparator;
pub mod lookup;

pub mod write_batch;
pub mod wal;
pub mod memtable;
pub mod version;
pub mod table_store;

pub mod write_controller;
pub mod flush_scheduler;
pub mod super_version;
pub mod column_family;
pub mod job_context;
pub mod background;
pub mod snapshot;
pub mod write_thread;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::Config;
pub use options::{ColumnFamilyOptions, FlushOptions, ReadOptions, WriteOptions};
pub use column_family::ColumnFamilyHandle;
pub use engine::{Engine, EngineStats, WriteCallback};
pub use snapshot::Snapshot;
pub use write_batch::WriteBatch;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! MemTable Module
//!
//! In-memory write buffers and the list of buffers waiting to be flushed.
//!
//! ## Responsibilities
//! - Hold versioned entries ordered by user key, newest sequence first
//! - Track approximate size and raise a flush request when full
//! - Keep immutable memtables in a refcounted, copy-on-write list version
//! - Hand memtables to flush jobs and install (or roll back) their results
//!
//! ## Ownership
//! ```text
//!   ColumnFamilyData ──ref──▶ MemTable (active)
//!   SuperVersion     ──ref──▶ MemTable, MemTableListVersion
//!   MemTableListVersion ─ref─▶ MemTable (immutable, newest first)
//! ```
//! Every arrow is one logical reference. A memtable whose count reaches zero
//! is collected into a to-free list and dropped after the engine lock is
//! released.

mod list;
mod table;

pub use list::{MemTableList, MemTableListVersion};
pub use table::{FlushState, MemTable};

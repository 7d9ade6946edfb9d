//! Error types for AtlasDB
//!
//! A single error type shared by the write path, background jobs and the
//! public API. It is `Clone` because a batch group leader hands the same
//! status to every writer it completed.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasDB operations
#[derive(Debug, Clone, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    // -------------------------------------------------------------------------
    // Admission Errors
    // -------------------------------------------------------------------------
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl From<std::io::Error> for AtlasError {
    fn from(err: std::io::Error) -> Self {
        AtlasError::Io(Arc::new(err))
    }
}

impl AtlasError {
    /// Errors that describe admission or lifecycle outcomes rather than a
    /// fault in the data path. These never become the sticky background error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AtlasError::Busy(_)
                | AtlasError::TimedOut(_)
                | AtlasError::Aborted(_)
                | AtlasError::ShutdownInProgress
        )
    }
}

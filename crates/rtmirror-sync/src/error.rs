//! Error types for replication

use thiserror::Error;

use rtmirror_core::SourceError;
use rtmirror_storage::StorageError;

/// Errors that can stop a replication step
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote source failed (transient)
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Local storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for replication operations
pub type SyncResult<T> = Result<T, SyncError>;

//! Error types for the sync layer.

use crate::repository::RepositoryError;
use replica_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error reported by a transport.
    #[error("network error: {0}")]
    Network(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The entity repository failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The store has not joined its replication channel.
    #[error("store {0} is not connected")]
    NotConnected(String),

    /// No tenant is active in the session.
    #[error("no active tenant")]
    NoTenant,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A background task failed to complete.
    #[error("task failed: {0}")]
    Task(String),
}

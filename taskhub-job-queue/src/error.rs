//! Error types for the job queue system.

use thiserror::Error;

/// Errors that may occur while interacting with the job queue.
///
/// Only [`JobQueueError::InvalidRequest`] is ever returned from
/// [`JobQueue::enqueue`](crate::JobQueue::enqueue); the remaining variants
/// describe execution-time failures that end up on the job record.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("No handler registered for job type: {0}")]
    UnregisteredHandler(String),

    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl JobQueueError {
    /// Shorthand for handlers reporting a failed attempt.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

/// Errors raised by a [`JobStorage`](crate::JobStorage) backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize job record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

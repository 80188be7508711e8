//! Pool Error Types

use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned when a task cannot be scheduled
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The scan began stopping before a slot became available
    #[error("Task submission cancelled: scan is stopping")]
    Cancelled,

    /// The pool's semaphore was closed
    #[error("Task pool is closed")]
    Closed,
}

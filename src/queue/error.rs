//! Queue Error Types
//!
//! Defines error types specific to the priority event queue.

use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur during queue operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No item is available in any priority bucket
    #[error("Queue is empty")]
    Empty,

    /// Unrecognized dequeue policy name
    #[error("Invalid dequeue policy: {0}. Valid options: weighted, strict")]
    InvalidPolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_messages() {
        assert_eq!(QueueError::Empty.to_string(), "Queue is empty");
        assert_eq!(
            QueueError::InvalidPolicy("fifo".to_string()).to_string(),
            "Invalid dequeue policy: fifo. Valid options: weighted, strict"
        );
    }
}

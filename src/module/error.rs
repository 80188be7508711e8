//! Module Error Types
//!
//! Errors raised by module hooks and by the worker machinery around them.

use thiserror::Error;

use crate::event::ValidationError;
use crate::pool::PoolError;

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Errors produced inside a module or its worker
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A hook failed while handling events
    #[error("Handler error: {0}")]
    Handler(String),

    /// Setup could not complete
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A required wordlist could not be obtained; treated as a soft setup failure
    #[error("Wordlist unavailable: {0}")]
    Wordlist(String),

    /// Invalid module settings or options
    #[error("Module configuration error: {0}")]
    Configuration(String),

    /// The scan is stopping
    #[error("Scan cancelled")]
    Cancelled,

    #[error("Event validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Task pool error: {0}")]
    Pool(#[from] PoolError),
}

impl ModuleError {
    /// Create a handler error
    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler(message.into())
    }

    /// Create a setup error
    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::Setup(message.into())
    }

    /// Create a wordlist error
    pub fn wordlist<S: Into<String>>(message: S) -> Self {
        Self::Wordlist(message.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error only signals that the scan is stopping
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Pool(PoolError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_detection() {
        assert!(ModuleError::Cancelled.is_cancelled());
        assert!(ModuleError::from(PoolError::Cancelled).is_cancelled());
        assert!(!ModuleError::from(PoolError::Closed).is_cancelled());
        assert!(!ModuleError::handler("boom").is_cancelled());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ModuleError::handler("boom").to_string(), "Handler error: boom");
        assert_eq!(
            ModuleError::wordlist("missing.txt").to_string(),
            "Wordlist unavailable: missing.txt"
        );
    }
}

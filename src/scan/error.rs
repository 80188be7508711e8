//! Scan Error Types
//!
//! Errors surfaced by scan construction and execution.

use thiserror::Error;

use crate::event::ValidationError;
use crate::module::ModuleError;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while building or running a scan
#[derive(Debug, Error)]
pub enum ScanError {
    /// Every module failed setup, or none were configured
    #[error("No modules available to run\n\nEvery configured module failed setup or was disabled. Run with --debug for details.")]
    NoModules,

    /// Configuration error
    #[error("Configuration problem: {0}\n\nCheck your configuration file or command line arguments. Run 'scancore --help' for usage information.")]
    Configuration(String),

    /// A module could not be configured or started
    #[error("Module '{name}': {source}")]
    Module { name: String, source: ModuleError },

    /// A scan target could not be turned into an event
    #[error("Invalid target '{target}': {source}")]
    Target {
        target: String,
        source: ValidationError,
    },

    /// Wrapped errors from other sources
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Attach a module name to a module error
    pub fn module(name: impl Into<String>, source: ModuleError) -> Self {
        Self::Module {
            name: name.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_carries_name() {
        let err = ScanError::module("speculate", ModuleError::configuration("unknown option 'x'"));
        assert_eq!(
            err.to_string(),
            "Module 'speculate': Module configuration error: unknown option 'x'"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_configuration_error_hint() {
        let err = ScanError::configuration("no targets given");
        assert!(err.to_string().starts_with("Configuration problem: no targets given"));
    }
}

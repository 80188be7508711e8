//! Event Validation Errors
//!
//! Errors raised by an [`EventFactory`](super::EventFactory) when the data of a
//! requested event does not match its declared or inferred type.

use thiserror::Error;

/// Result type for event construction
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Reasons an event could not be constructed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No data was supplied
    #[error("Empty data for event type {event_type}")]
    EmptyData { event_type: String },

    /// Data does not parse as the requested type
    #[error("Invalid {event_type}: \"{data}\"")]
    InvalidData { event_type: String, data: String },

    /// No type was requested and none could be inferred
    #[error("Unable to infer event type for \"{data}\"")]
    UnknownType { data: String },

    /// Sentinel types are reserved for the engine
    #[error("Event type {event_type} is reserved")]
    ReservedType { event_type: String },
}

impl ValidationError {
    /// Create an invalid data error
    pub fn invalid_data(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InvalidData {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let error = ValidationError::invalid_data("IP_ADDRESS", "999.1.1.1");
        assert_eq!(error.to_string(), "Invalid IP_ADDRESS: \"999.1.1.1\"");

        let error = ValidationError::UnknownType { data: "???".to_string() };
        assert_eq!(error.to_string(), "Unable to infer event type for \"???\"");
    }
}

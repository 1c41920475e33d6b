//! Error types for event-relay

use thiserror::Error;

/// Errors that can occur in the event pipeline
#[derive(Debug, Error)]
pub enum EventError {
    /// Event failed structural validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Broker write failure
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Broker read failure
    #[error("Consume error: {0}")]
    Consume(String),

    /// Offset commit failure
    #[error("Failed to commit offsets: {0}")]
    Commit(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted on a closed publisher/pipeline
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Retry attempts exhausted
    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: String,
    },
}

/// Validation failures, one variant per offending field
///
/// The variant identifies which field failed so metrics can be
/// labeled by failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("event id cannot be empty")]
    EmptyId,

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("event data cannot be empty")]
    EmptyData,

    #[error("event data is {len} bytes, maximum is {max}")]
    DataTooLong { len: usize, max: usize },

    #[error("event timestamp is zero or before the epoch")]
    ZeroTimestamp,

    #[error("event timestamp is too far in the future")]
    FutureTimestamp,
}

impl ValidationError {
    /// Short label for the failed field, used as a metric label
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyId => "id",
            ValidationError::UnknownType(_) => "type",
            ValidationError::EmptyData | ValidationError::DataTooLong { .. } => "data",
            ValidationError::ZeroTimestamp | ValidationError::FutureTimestamp => "timestamp",
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_fields() {
        assert_eq!(ValidationError::EmptyId.field(), "id");
        assert_eq!(ValidationError::UnknownType("x".into()).field(), "type");
        assert_eq!(ValidationError::EmptyData.field(), "data");
        assert_eq!(
            ValidationError::DataTooLong { len: 20_000, max: 10_000 }.field(),
            "data"
        );
        assert_eq!(ValidationError::ZeroTimestamp.field(), "timestamp");
        assert_eq!(ValidationError::FutureTimestamp.field(), "timestamp");
    }

    #[test]
    fn test_validation_error_wraps_into_event_error() {
        let err: EventError = ValidationError::EmptyData.into();
        assert!(matches!(err, EventError::Validation(ValidationError::EmptyData)));
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(EventError::Closed("publisher").to_string(), "publisher is closed");
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = EventError::RetriesExhausted {
            attempts: 4,
            last: "broker unreachable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("broker unreachable"));
    }
}

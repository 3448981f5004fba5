//! Error types for the Fieldgate limiter.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Fieldgate operations.
#[derive(Error, Debug)]
pub enum FieldgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A resource was evaluated without a rate limit registration
    #[error("Resource `{0}` has no rate limit registration")]
    UnknownResource(String),

    /// A resource was registered twice with different limits
    #[error("Resource `{0}` is already registered with a different limit")]
    DuplicateResource(String),

    /// The request context lacks the identifier a resource is keyed on
    #[error("Missing :{key} key on the GraphQL context")]
    MissingIdentifier { key: String },

    /// The counter store could not record an attempt
    #[error("Counter store unavailable while evaluating `{resource}`: {source}")]
    StoreUnavailable {
        resource: String,
        #[source]
        source: StoreError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Fieldgate operations.
pub type Result<T> = std::result::Result<T, FieldgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_identifier_message() {
        let err = FieldgateError::MissingIdentifier {
            key: "client_id".to_string(),
        };
        assert_eq!(err.to_string(), "Missing :client_id key on the GraphQL context");
    }

    #[test]
    fn test_store_unavailable_keeps_source() {
        use std::error::Error as _;

        let err = FieldgateError::StoreUnavailable {
            resource: "expensiveField".to_string(),
            source: StoreError::Unavailable("connection refused".to_string()),
        };
        assert!(err.to_string().contains("expensiveField"));
        assert!(err.source().is_some());
    }
}

//! Logging error types

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoggingError {
    /// A global subscriber is already installed, or setup failed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InvalidConfiguration("unknown level: loud".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid logging configuration: unknown level: loud"
        );
    }
}

//! Error types for health check setup
//!
//! Only setup can fail with these errors. Once a check is registered, every
//! run-time connectivity problem is reported as a verdict instead.

use thiserror::Error;

/// Main error type for building and registering health checks
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Invalid argument `{argument}`: {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] crate::client::ClientError),

    #[error("No async runtime available: {0}")]
    Runtime(String),
}

impl HealthError {
    /// Create invalid argument error
    pub fn invalid_argument<S: Into<String>>(argument: &'static str, message: S) -> Self {
        Self::InvalidArgument {
            argument,
            message: message.into(),
        }
    }

    /// Shorthand for a required argument that was not supplied
    pub fn missing(argument: &'static str) -> Self {
        Self::invalid_argument(argument, "value is required")
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, HealthError::InvalidArgument { .. })
    }
}

/// Result type for health check setup
pub type HealthResult<T> = Result<T, HealthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;

    #[test]
    fn test_invalid_argument_constructor() {
        let error = HealthError::invalid_argument("name", "must not be blank");
        assert!(error.is_invalid_argument());
        assert_eq!(
            error.to_string(),
            "Invalid argument `name`: must not be blank"
        );
    }

    #[test]
    fn test_missing_constructor() {
        let error = HealthError::missing("client");
        assert!(matches!(
            error,
            HealthError::InvalidArgument {
                argument: "client",
                ..
            }
        ));
        assert!(error.to_string().contains("client"));
    }

    #[test]
    fn test_client_error_conversion() {
        let error: HealthError = ClientError::MissingOptions.into();
        assert!(matches!(error, HealthError::Client(_)));
        assert!(!error.is_invalid_argument());
    }
}

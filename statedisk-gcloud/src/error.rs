//! Error types for the provider clients

use statedisk_core::error::RunError;
use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur when talking to the compute provider or blob store
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A provider CLI invocation failed
    #[error("'{program}' failed: {detail}")]
    CommandFailed {
        /// The program that was invoked
        program: String,
        /// Trimmed stderr or exit information
        detail: String,
    },

    /// Failed to spawn or communicate with a provider CLI process
    #[error("failed to run provider command: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// No usable access token for the blob store
    #[error("blob store authentication failed: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Failed to parse a provider response
    #[error("failed to parse provider response: {0}")]
    ParseError(String),
}

impl ProviderError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }
}

impl From<ProviderError> for RunError {
    fn from(err: ProviderError) -> Self {
        RunError::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(ProviderError::NotFound("instance x".into()).is_not_found());
        assert!(ProviderError::api_error(404, "gone").is_not_found());
        assert!(!ProviderError::api_error(500, "boom").is_not_found());
        assert!(
            !ProviderError::CommandFailed {
                program: "gcloud".into(),
                detail: "exit 1".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn test_conversion_to_run_error() {
        let err: RunError = ProviderError::Unauthorized("no token".into()).into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("no token"));
    }
}

//! Error types for migration operations.

use thiserror::Error;

use crate::types::Platform;

/// Migration-specific errors.
///
/// Everything that escapes the orchestrator as an `Err` ends the run. Failures
/// of a single group, membership or repository assignment are reported through
/// outcome values instead and never show up here.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Credentials were rejected (HTTP 401).
    #[error("Authentication failed on {platform}: {message}")]
    AuthenticationFailed {
        /// System that rejected the credentials.
        platform: Platform,
        /// Detail for the operator.
        message: String,
    },

    /// Credentials are valid but lack admin scope or the caller is not allow-listed (HTTP 403).
    #[error("Access denied on {platform}: {message}")]
    Forbidden {
        /// System that refused the request.
        platform: Platform,
        /// Detail for the operator.
        message: String,
    },

    /// The instance is down, not running, or refused the session check.
    #[error("Instance not available: {0}")]
    InstanceNotAvailable(String),

    /// A read request returned an unexpected status.
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Transport-level failure (DNS, connect, TLS, timeout).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A permission string outside the known vocabulary.
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MigrationError {
    /// Whether the error invalidates the whole session rather than a single request.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::Forbidden { .. } | Self::InstanceNotAvailable(_)
        )
    }
}

impl From<validator::ValidationErrors> for MigrationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidConfig(errors.to_string())
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

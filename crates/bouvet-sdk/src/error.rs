//! Error types for bouvet-sdk.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for bouvet-sdk operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors that can occur while talking to the execution platform.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Invalid client configuration (missing API key, bad base URL, ...).
    ///
    /// Raised before any network call is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller input that cannot be turned into a well-formed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-retryable response from the platform (4xx and other non-5xx codes).
    #[error("client error {status}: {body}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the platform
        body: String,
    },

    /// Server-side failure that persisted through every retry attempt.
    #[error("server error {status} after {attempts} attempt(s): {body}")]
    Server {
        /// Last observed HTTP status code
        status: u16,
        /// Last observed response body
        body: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Transport failure (connection refused/reset, broken body, ...).
    #[error("network error after {attempts} attempt(s): {message}")]
    Network {
        /// Last observed transport error
        message: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The request deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Missing or invalid snapshot/branch reference.
    #[error("resource error: {0}")]
    Resource(String),

    /// A successful response whose body does not match the wire contract.
    #[error("decode error: {0}")]
    Decode(String),

    /// Every branch of a fork failed.
    #[error("all {branches} fork branches failed, last error: {last_error}")]
    AllBranchesFailed {
        /// Number of branches dispatched
        branches: usize,
        /// Error text of the last failing branch in declaration order
        last_error: String,
    },
}

impl SdkError {
    /// Whether the retry controller may attempt the call again.
    ///
    /// Only server-side (5xx) and transport failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network { .. })
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Return a copy of a retryable error stamped with the attempt count.
    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            Self::Server { status, body, .. } => Self::Server {
                status,
                body,
                attempts,
            },
            Self::Network { message, .. } => Self::Network { message, attempts },
            other => other,
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

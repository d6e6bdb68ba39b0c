//! Error types for the Bailian client

use thiserror::Error;

/// Result type alias for Bailian client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Bailian client
///
/// Transport and protocol failures are errors. A well-formed response
/// envelope with `Success == false` is not: it is returned as data so the
/// caller can branch on its code and message.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP transport error (connection refused, DNS failure, timeout, bad URL)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 initial response; carries the raw body text verbatim
    #[error("Failed to complete request, code: {status}, message: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The identity service rejected a token creation call
    #[error("Failed to create token, reason: {message} RequestId: {request_id}")]
    TokenCreation {
        /// Message from the response envelope
        message: String,
        /// Request id from the envelope or the `x-acs-request-id` header
        request_id: String,
    },

    /// An identity service call other than token creation was rejected
    #[error("{action} failed, code: {code}, reason: {message} RequestId: {request_id}")]
    Pop {
        /// RPC action name
        action: String,
        /// Error code from the response envelope
        code: String,
        /// Message from the response envelope
        message: String,
        /// Request id from the envelope or the `x-acs-request-id` header
        request_id: String,
    },

    /// Reading a streamed response body failed
    #[error("Stream read error: {0}")]
    Stream(#[source] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tracing error
    #[error("Tracing error: {0}")]
    Tracing(String),
}

impl Error {
    /// Create a status error from a response status and its raw body
    pub fn status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// Create a token creation error
    pub fn token_creation(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::TokenCreation {
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

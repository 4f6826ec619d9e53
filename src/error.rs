//! Error types for qrt.
//!
//! This module defines `QrtError`, the unified error type used throughout
//! the library for consistent error handling and propagation.
//!
//! # Security
//!
//! The RT password travels in every request body, so it can end up echoed
//! back in server responses. Use `sanitize_message()` on any message built
//! from external sources before it lands in an error or a log line.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for all qrt operations.
#[derive(Error, Debug)]
pub enum QrtError {
    /// Configuration error - missing file, section, key or malformed line.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server could not be reached, or the trust anchor is unusable.
    #[error("connection error: {0}")]
    Connection(String),

    /// A value handed to a constructor or operation is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server sent a response that does not have the expected shape.
    #[error("malformed server response: {0}")]
    Parse(String),

    /// Reading from or writing to the server failed mid-request.
    #[error("HTTP request failed: {0}")]
    Io(#[from] std::io::Error),

    /// The server's reply is not valid HTTP/1.x.
    #[error("invalid HTTP response: {0}")]
    Protocol(String),

    /// HTTP response returned a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code returned.
        status: http::StatusCode,
        /// The response body, truncated and sanitized.
        body: String,
    },

    /// Request timed out.
    #[error("request timed out after {duration:?} - the server may be slow or unreachable")]
    Timeout {
        /// How long we waited before timing out.
        duration: Duration,
        /// The operation that timed out.
        operation: String,
    },
}

impl QrtError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        QrtError::Config(message.into())
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        QrtError::Connection(message.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        QrtError::InvalidArgument(message.into())
    }

    /// Creates a parse error for a response line that is not `<id>: <name>`.
    pub fn malformed_line(line_number: usize, line: &str) -> Self {
        QrtError::Parse(format!(
            "line {} is not of the form '<id>: <name>': {:?}",
            line_number,
            line.chars().take(80).collect::<String>()
        ))
    }

    /// Creates an HTTP protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        QrtError::Protocol(message.into())
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration, operation: impl Into<String>) -> Self {
        QrtError::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Returns true if the server could not be reached or trusted.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, QrtError::Connection(_))
    }

    /// Replaces every occurrence of `secret` in `message` with `[REDACTED]`.
    ///
    /// An empty secret leaves the message untouched.
    #[must_use]
    pub fn sanitize_message(message: &str, secret: &str) -> String {
        if secret.is_empty() {
            return message.to_string();
        }
        message.replace(secret, "[REDACTED]")
    }
}

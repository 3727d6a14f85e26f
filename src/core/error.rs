/// Otpgate Error Module
///
/// This module defines the error taxonomy of the persistence core and the
/// application built on it. Validation failures are not errors here:
/// they live in an entity's error map, not in this enum.
use thiserror::Error;

/// Error type for every fallible operation in otpgate.
///
/// The variants follow the lifecycle of a statement:
/// - opening the handle (`Connection`)
/// - compiling a query specification (`QueryBuild`)
/// - preparing and executing it (`Prepare`, `Execute`)
/// - iterating the result (`NotSeekable`)
#[derive(Error, Debug)]
pub enum OtpgateError {
    /// Missing or rejected connection parameters
    #[error("Connection error: {0}")]
    Connection(String),

    /// The driver refused to prepare a statement
    #[error("Failed to prepare SQL: {sql}: {message}")]
    Prepare { sql: String, message: String },

    /// The driver failed while executing a prepared statement
    #[error("Failed to execute SQL: {sql}: {message}")]
    Execute { sql: String, message: String },

    /// Malformed join, condition or parameter shape, raised before any I/O
    #[error("Query build error: {0}")]
    QueryBuild(String),

    /// A forward-only cursor was rewound after it started reading
    #[error("DataReader cannot rewind. It is a forward-only reader.")]
    NotSeekable,

    /// Errors surfaced directly by SQLite outside statement execution
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding and decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Password hashing failures
    #[error("Password hash error: {0}")]
    Password(String),

    /// Background worker resolution and execution errors
    #[error("Worker error: {0}")]
    Worker(String),
}

impl OtpgateError {
    /// Create a query build error
    pub fn query_build(message: impl Into<String>) -> Self {
        Self::QueryBuild(message.into())
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// The native driver message carried by prepare/execute errors.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            Self::Prepare { message, .. } | Self::Execute { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Type alias for Result to use OtpgateError as the error type.
pub type Result<T> = std::result::Result<T, OtpgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = OtpgateError::Database(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("Database error"));

        let build_err = OtpgateError::query_build("bad join");
        assert_eq!(build_err.to_string(), "Query build error: bad join");

        let exec_err = OtpgateError::Execute {
            sql: "SELECT 1".to_string(),
            message: "boom".to_string(),
        };
        assert!(exec_err.to_string().contains("SELECT 1"));
        assert_eq!(exec_err.native_message(), Some("boom"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OtpgateError = io_err.into();
        match err {
            OtpgateError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let json_err: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{ invalid json }");
        let err: OtpgateError = json_err.unwrap_err().into();
        match err {
            OtpgateError::Json(_) => {}
            _ => panic!("Expected JSON error"),
        }
    }

    #[test]
    fn test_not_seekable_message() {
        assert!(OtpgateError::NotSeekable.to_string().contains("forward-only"));
    }
}

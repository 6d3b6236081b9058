//! Error types for Coderoom

use std::time::Duration;
use thiserror::Error;

/// Result type alias using Coderoom's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Coderoom
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested language has no registered sandbox runtime
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Execution did not finish before its deadline
    #[error("execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The sandboxed program ran and failed
    #[error("runtime error: {message}")]
    Runtime {
        /// Short description (exit status or trap)
        message: String,
        /// Everything the program wrote to its error stream
        stderr: String,
    },

    /// Wasm runtime error
    #[error("Wasm runtime error: {0}")]
    Wasm(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Unauthorized(_)
                | Error::UnsupportedLanguage(_)
        )
    }

    /// Check if the error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

impl From<wasmtime::Error> for Error {
    fn from(err: wasmtime::Error) -> Self {
        Error::Wasm(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_language_names_id() {
        let err = Error::UnsupportedLanguage("brainfuck".to_string());
        assert_eq!(err.to_string(), "unsupported language: brainfuck");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = Error::Timeout(Duration::from_millis(1500));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "execution timed out after 1500ms");

        let runtime = Error::Runtime {
            message: "exit status 1".to_string(),
            stderr: "boom".to_string(),
        };
        assert!(!runtime.is_timeout());
    }
}

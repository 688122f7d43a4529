//! Error types for local gateway emulation.

use thiserror::Error;

/// Main error type for spa-local operations
#[derive(Error, Debug)]
pub enum SpaError {
    /// A required path (handlers root, base document, artifact) does not exist
    #[error("path not found: {0}")]
    NotFound(String),

    /// Reading or writing a file failed
    #[error("I/O error on '{0}': {1}")]
    Io(String, String),

    /// An endpoint's description file could not be parsed
    #[error("malformed descriptor for endpoint '{0}': {1}")]
    MalformedDescriptor(String, String),

    /// The base API document or the written artifact is unusable
    #[error("invalid API document '{0}': {1}")]
    InvalidDocument(String, String),

    /// A discovered endpoint has no handler in the registry
    #[error("no handler registered for endpoint '{0}'")]
    HandlerNotRegistered(String),

    /// The handler raised, panicked, or exited unsuccessfully
    #[error("handler for endpoint '{0}' failed: {1}")]
    HandlerFailed(String, String),

    /// The handler did not return within the configured timeout
    #[error("handler for endpoint '{0}' timed out")]
    HandlerTimeout(String),

    /// The handler returned a status code HTTP cannot carry
    #[error("handler for endpoint '{0}' returned invalid status code {1}")]
    InvalidStatusCode(String, i64),

    /// A configuration value is missing or unparsable
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),

    /// The listener could not be bound
    #[error("failed to bind to {0}: {1}")]
    Bind(String, String),

    /// The HTTP server stopped with an error
    #[error("server error: {0}")]
    Server(String),

    /// The supervised child process could not be started or awaited
    #[error("supervisor error: {0}")]
    Supervisor(String),
}

/// Result type alias for spa-local operations
pub type Result<T> = std::result::Result<T, SpaError>;

impl SpaError {
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        SpaError::Io(path.display().to_string(), err.to_string())
    }
}

//! Common error types for mprep

use thiserror::Error;

/// Common result type for mprep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the mprep crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Formula parse or evaluation error
    #[error(transparent)]
    Formula(#[from] crate::formula::FormulaError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

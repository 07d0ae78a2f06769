//! Error types for Trickle.

use thiserror::Error;

/// Main error type for Trickle operations.
#[derive(Error, Debug)]
pub enum TrickleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No async runtime available to host the replenishment task
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Trickle operations.
pub type Result<T> = std::result::Result<T, TrickleError>;

//! Error types for the RFB server library.

use std::io;
use thiserror::Error;

/// Result type for RFB operations.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Errors that can occur in RFB server operations.
#[derive(Debug, Error)]
pub enum RfbError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RFB protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid operation or state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

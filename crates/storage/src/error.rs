//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist (local path, or a 404 from a server).
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Remote fetch failed (connection, status code, malformed response).
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// Location could not be parsed or escapes the repository root.
    #[display("invalid location: {_0}")]
    InvalidLocation(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport(_) | Self::BackendError(_))
    }

    /// Returns `true` if the location simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

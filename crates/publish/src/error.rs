//! Publish Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only [`ErrorKind::Store`] (and the end-of-run [`ErrorKind::Ledger`]) ever
//! reach the caller of a publish run; everything else is attached to a single
//! artifact or subtree, logged, and counted.

use derive_more::{Display, Error};

/// A publish error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for publish operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The artifact disappeared between listing and opening.
    #[display("artifact not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Opening or reading the artifact failed.
    #[display("could not read artifact: {_0}")]
    Transport(#[error(not(source))] String),
    /// The extension is neither a symbol file nor a known archive.
    #[display("unsupported artifact: {_0}")]
    UnsupportedArtifact(#[error(not(source))] String),
    /// Archives are recognised but their contents are not extracted.
    #[display("archive expansion is not implemented: {_0}")]
    ArchiveExpansion(#[error(not(source))] String),
    /// No hash provider recognised the artifact's format.
    #[display("no hash provider recognised {_0}")]
    HashUnavailable(#[error(not(source))] String),
    /// The symbol store could not be read or written; fatal to the run.
    #[display("symbol store failure")]
    Store,
    /// Copying bytes or writing a pointer file under the store root failed.
    #[display("could not write store files for {_0}")]
    StoreFiles(#[error(not(source))] String),
    /// The visited-location ledger could not be persisted.
    #[display("could not persist ledger")]
    Ledger,
    /// The persisted ledger is missing, corrupt or from another version.
    #[display("could not load ledger")]
    LedgerLoad,
    /// Listing a directory (or the repository roots) failed.
    #[display("could not enumerate {_0}")]
    Enumerate(#[error(not(source))] String),
    /// The deploy worker panicked or was aborted.
    #[display("deploy worker stopped unexpectedly")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Enumerate(_))
    }

    /// Returns `true` if the run cannot continue past this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store | Self::Worker)
    }
}

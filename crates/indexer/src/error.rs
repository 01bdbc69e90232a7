//! Indexer Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only [`ErrorKind::Store`], [`ErrorKind::InvalidRoot`] and
//! [`ErrorKind::Worker`] end a run. The scan kinds are reported per entry and
//! the run carries on.

use derive_more::{Display, Error};
use std::io;
use std::path::PathBuf;

/// An indexer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The catalog could not be read or written; the run was aborted.
    #[display("catalog store failed")]
    Store,
    #[display("not a readable directory: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    /// A worker task panicked or was aborted.
    #[display("indexing task failed")]
    Worker,
    /// A directory's entries could not be listed.
    #[display("could not read directory {}: {_1}", _0.display())]
    ReadDir(#[error(not(source))] PathBuf, #[error(not(source))] io::ErrorKind),
    /// An entry was listed but could not be inspected (e.g. a broken link).
    #[display("could not inspect {}: {_1}", _0.display())]
    Stat(#[error(not(source))] PathBuf, #[error(not(source))] io::ErrorKind),
    /// The catalog keys records by UTF-8 path, so this entry was left out.
    #[display("name is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Store | ErrorKind::ReadDir(..) | ErrorKind::Stat(..))
    }
}

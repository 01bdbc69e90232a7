//! Format Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::Format;
use derive_more::{Display, Error};

/// A format error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for format operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A format name (e.g. from the catalog) that isn't part of the closed set.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    #[display("file is empty")]
    Empty,
    /// The extension claims a format the header bytes do not agree with.
    #[display("header does not look like {_0}: {_1}")]
    HeaderMismatch(#[error(not(source))] Format, #[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

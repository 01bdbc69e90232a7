//! Kernel Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every kind here describes what happened to a *single file*; none of them
//! should stop an indexing run.

use derive_more::{Display, Error};
use std::time::Duration;

/// A kernel error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file content is not valid for its format.
    #[display("malformed model: {_0}")]
    Malformed(#[error(not(source))] String),
    /// The file is valid, but uses something the kernel cannot evaluate.
    #[display("unsupported feature: {_0}")]
    UnsupportedFeature(#[error(not(source))] String),
    /// The kernel did not answer within the deadline.
    #[display("kernel timed out after {}ms", _0.as_millis())]
    Timeout(#[error(not(source))] Duration),
    /// The kernel died, panicked, or answered with garbage.
    #[display("kernel crashed: {_0}")]
    KernelCrash(#[error(not(source))] String),
    /// No external kernel executable could be located.
    #[display("geometry kernel executable not found")]
    KernelNotFound,
    /// The model file could not be read.
    #[display("could not read model file")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout(_) | ErrorKind::Io | ErrorKind::KernelNotFound)
    }
}

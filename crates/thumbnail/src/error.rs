//! Thumbnail Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A thumbnail error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for thumbnail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The scene has no triangles to draw.
    #[display("scene is empty")]
    EmptyScene,
    /// The scene has triangles, but they have no area or no extent.
    #[display("scene geometry is degenerate")]
    DegenerateGeometry,
    #[display("thumbnail size must be between {} and {} pixels, got {_0}", crate::MIN_SIZE, crate::MAX_SIZE)]
    InvalidSize(#[error(not(source))] u32),
    /// Thumbnails are keyed by content hash; anything else is refused.
    #[display("invalid content fingerprint: {_0}")]
    InvalidFingerprint(#[error(not(source))] String),
    #[display("could not encode thumbnail image")]
    Encode,
    #[display("thumbnail store I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io(_))
    }
}

//! CAD model format detection.
//!
//! Classification happens in two cheap steps, before any expensive parsing:
//! 1. The file extension is matched against a fixed table ([`Format::from_path`]).
//! 2. A bounded read of the file header ([`HEADER_LEN`] bytes) is checked for
//!    the signature of that format ([`Format::check_header`]).
//!
//! A file with an unrecognized extension is [`Classification::Unknown`]; a file
//! with a recognized extension but a header that disagrees is
//! [`Classification::Rejected`] with the reason attached.

mod construct;
pub mod error;
mod sniff;

use crate::error::ErrorKind;
use std::path::Path;

/// Number of leading bytes read from a file for header sniffing.
pub const HEADER_LEN: usize = 512;

/// The closed set of recognized CAD model formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Format {
    /// BRL-CAD geometry database (`.g`), either v4 or v5.
    BrlCad,
    /// Stereolithography mesh, ASCII or binary.
    Stl,
    /// Wavefront OBJ mesh.
    Obj,
    /// Stanford polygon file.
    Ply,
    /// Object File Format mesh.
    Off,
    /// ISO 10303-21 exchange file.
    Step,
    /// Initial Graphics Exchange Specification.
    Iges,
    /// 3D Manufacturing Format (ZIP container).
    ThreeMf,
}

/// Outcome of classifying a candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Extension and header agree; the file is worth handing to a kernel.
    Recognized(Format),
    /// Extension is recognized but the header is empty, truncated or belongs
    /// to something else.
    Rejected(Format, ErrorKind),
    /// Not a CAD format this crate knows about.
    Unknown,
}

/// Classify a file from its path, the first [`HEADER_LEN`] bytes of content
/// (fewer if the file is shorter), and its total size in bytes.
#[must_use]
pub fn classify(path: impl AsRef<Path>, header: &[u8], size: u64) -> Classification {
    let Some(format) = Format::from_path(path) else {
        return Classification::Unknown;
    };
    match format.check_header(header, size) {
        Ok(()) => Classification::Recognized(format),
        Err(err) => Classification::Rejected(format, (*err).clone()),
    }
}

impl Classification {
    /// The format claimed by the extension, if any.
    #[must_use]
    pub fn format(&self) -> Option<Format> {
        match self {
            Classification::Recognized(format) | Classification::Rejected(format, _) => Some(*format),
            Classification::Unknown => None,
        }
    }
}

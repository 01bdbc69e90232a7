use crate::Format;
use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::{path::Path, str::FromStr};

impl Format {
    /// Every recognized format, in a stable order.
    pub const ALL: [Format; 8] = [
        Format::BrlCad,
        Format::Stl,
        Format::Obj,
        Format::Ply,
        Format::Off,
        Format::Step,
        Format::Iges,
        Format::ThreeMf,
    ];

    /// Detect the format from a file extension (case-insensitive).
    ///
    /// Returns `None` for unknown extensions and for dotfiles without an
    /// extension (`.stl` on its own is a hidden file, not an STL model).
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        Format::ALL.into_iter().find(|format| format.extensions().contains(&ext.as_str()))
    }

    /// File extensions (without the leading dot) mapped to this format.
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Format::BrlCad => &["g"],
            Format::Stl => &["stl"],
            Format::Obj => &["obj"],
            Format::Ply => &["ply"],
            Format::Off => &["off"],
            Format::Step => &["step", "stp"],
            Format::Iges => &["iges", "igs"],
            Format::ThreeMf => &["3mf"],
        }
    }

    /// Short, stable name used for persistence and display.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::BrlCad => "brlcad",
            Format::Stl => "stl",
            Format::Obj => "obj",
            Format::Ply => "ply",
            Format::Off => "off",
            Format::Step => "step",
            Format::Iges => "iges",
            Format::ThreeMf => "3mf",
        }
    }
}

impl FromStr for Format {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brlcad" | "g" => Ok(Format::BrlCad),
            "stl" => Ok(Format::Stl),
            "obj" => Ok(Format::Obj),
            "ply" => Ok(Format::Ply),
            "off" => Ok(Format::Off),
            "step" | "stp" => Ok(Format::Step),
            "iges" | "igs" => Ok(Format::Iges),
            "3mf" | "threemf" => Ok(Format::ThreeMf),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Format {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

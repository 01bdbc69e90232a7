use crate::error::{ErrorKind, Result};
use cadventory_format::Format;
use cadventory_kernel::GeometryMetadata;
use derive_more::Display;
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Where a file is in its lifecycle.
///
/// `Pending` only exists in memory while a worker owns the file; the catalog
/// refuses to store it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[display("pending")]
    Pending,
    #[display("parsed")]
    Parsed,
    #[display("parse_failed")]
    ParseFailed,
    #[display("unsupported")]
    Unsupported,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pending, Status::Parsed, Status::ParseFailed, Status::Unsupported];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Parsed => "parsed",
            Status::ParseFailed => "parse_failed",
            Status::Unsupported => "unsupported",
        }
    }
}

impl FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_raise(|| ErrorKind::InvalidData("status"))
    }
}

/// Pipeline stage a diagnostic was raised in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[display("scan")]
    Scan,
    #[display("classify")]
    Classify,
    #[display("extract")]
    Extract,
    #[display("render")]
    Render,
    #[display("store")]
    Store,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    #[display("io")]
    Io,
    #[display("unrecognized")]
    Unrecognized,
    #[display("malformed")]
    Malformed,
    #[display("unsupported_feature")]
    UnsupportedFeature,
    #[display("timeout")]
    Timeout,
    #[display("kernel_crash")]
    KernelCrash,
    /// No kernel able to read the format was available.
    #[display("kernel_unavailable")]
    KernelUnavailable,
    #[display("render")]
    Render,
}

impl DiagnosticKind {
    /// Returns `true` if the same unchanged file might settle differently on
    /// another attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, DiagnosticKind::Io | DiagnosticKind::Timeout | DiagnosticKind::KernelUnavailable)
    }
}

/// One problem encountered while indexing a file.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[display("[{stage}/{kind}] {message}")]
pub struct Diagnostic {
    pub stage: Stage,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { stage, kind, message: message.into() }
    }
}

/// Identity of a file's content as last observed.
///
/// Size and modification time are cheap to compare on every scan; the BLAKE3
/// hash is only computed for recognized formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time, in nanoseconds since the Unix epoch.
    pub modified_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    pub fn new(size: u64, modified_ns: i64) -> Self {
        Self { size, modified_ns, content_hash: None }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Whether size and modification time match, ignoring the content hash.
    pub fn same_stat(&self, other: &Fingerprint) -> bool {
        self.size == other.size && self.modified_ns == other.modified_ns
    }
}

/// Everything the catalog knows about one file.
///
/// Records start out [`Pending`](Status::Pending) and are settled exactly
/// once through [`parsed`](Self::parsed), [`failed`](Self::failed) or
/// [`unsupported`](Self::unsupported). Those transitions keep metadata and
/// thumbnail consistent with the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub format: Option<Format>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GeometryMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl FileRecord {
    pub fn pending(path: impl Into<PathBuf>, fingerprint: Fingerprint, format: Option<Format>) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            format,
            status: Status::Pending,
            metadata: None,
            thumbnail: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn parsed(mut self, metadata: GeometryMetadata, thumbnail: Option<String>) -> Self {
        self.status = Status::Parsed;
        self.metadata = Some(metadata);
        self.thumbnail = thumbnail;
        self
    }

    pub fn failed(self, diagnostic: Diagnostic) -> Self {
        self.settle_without_metadata(Status::ParseFailed, diagnostic)
    }

    pub fn unsupported(self, diagnostic: Diagnostic) -> Self {
        self.settle_without_metadata(Status::Unsupported, diagnostic)
    }

    fn settle_without_metadata(mut self, status: Status, diagnostic: Diagnostic) -> Self {
        self.status = status;
        self.metadata = None;
        self.thumbnail = None;
        self.diagnostics.push(diagnostic);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, Status::ParseFailed | Status::Unsupported)
    }

    /// A failure caused by the environment rather than the file, which should
    /// be retried even if the file is untouched.
    pub fn is_transient_failure(&self) -> bool {
        self.is_failure() && self.diagnostics.iter().any(|d| d.kind.is_transient())
    }

    /// Check the record is settled and internally consistent.
    pub fn validate(&self) -> Result<()> {
        match self.status {
            Status::Pending => exn::bail!(ErrorKind::Invariant("pending records are not stored")),
            Status::Parsed if self.metadata.is_none() => {
                exn::bail!(ErrorKind::Invariant("parsed record without metadata"))
            },
            Status::Parsed => {},
            Status::ParseFailed | Status::Unsupported => {
                if self.metadata.is_some() || self.thumbnail.is_some() {
                    exn::bail!(ErrorKind::Invariant("failed record with metadata or thumbnail"));
                }
                if self.diagnostics.is_empty() {
                    exn::bail!(ErrorKind::Invariant("failed record without diagnostics"));
                }
            },
        }
        if !self.path.is_absolute() {
            exn::bail!(ErrorKind::Invariant("record path is not absolute"));
        }
        Ok(())
    }
}

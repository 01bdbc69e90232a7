use crate::error::{Error, ErrorKind};
use crate::record::{Diagnostic, FileRecord, Fingerprint, Status};
use cadventory_format::Format;
use cadventory_kernel::GeometryMetadata;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
    pub root: String,
    pub path: String,
    pub file_size: i64,
    pub modified_ns: i64,
    pub content_hash: Option<String>,
    pub format: Option<String>,
    pub status: String,
    pub metadata: Option<String>,
    pub thumbnail: Option<String>,
    pub diagnostics: String,
}

impl TryFrom<(&Path, &FileRecord)> for RecordRow {
    type Error = Error;
    fn try_from((root, record): (&Path, &FileRecord)) -> Result<Self, Self::Error> {
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("metadata"))?;
        Ok(Self {
            root: root.to_str().ok_or_raise(|| ErrorKind::InvalidData("root"))?.to_string(),
            path: record.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            file_size: i64::try_from(record.fingerprint.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            modified_ns: record.fingerprint.modified_ns,
            content_hash: record.fingerprint.content_hash.clone(),
            format: record.format.map(|format| format.as_str().to_string()),
            status: record.status.as_str().to_string(),
            metadata,
            thumbnail: record.thumbnail.clone(),
            diagnostics: serde_json::to_string(&record.diagnostics)
                .or_raise(|| ErrorKind::InvalidData("diagnostics"))?,
        })
    }
}

impl TryFrom<RecordRow> for FileRecord {
    type Error = Error;
    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let metadata: Option<GeometryMetadata> = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("metadata"))?;
        let diagnostics: Vec<Diagnostic> =
            serde_json::from_str(&row.diagnostics).or_raise(|| ErrorKind::InvalidData("diagnostics"))?;
        Ok(Self {
            path: PathBuf::from(row.path),
            fingerprint: Fingerprint {
                size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
                modified_ns: row.modified_ns,
                content_hash: row.content_hash,
            },
            format: row
                .format
                .as_deref()
                .map(str::parse::<Format>)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("format"))?,
            status: row.status.parse::<Status>()?,
            metadata,
            thumbnail: row.thumbnail,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DiagnosticKind, Stage};

    #[test]
    fn test_model_to_row() {
        let record = FileRecord::pending("/models/b.stl", Fingerprint::new(12, 99), Some(Format::Stl))
            .failed(Diagnostic::new(Stage::Classify, DiagnosticKind::Malformed, "bad header"));
        let row = RecordRow::try_from((Path::new("/models"), &record)).unwrap();
        assert_eq!(row.status, "parse_failed");
        assert_eq!(row.format.as_deref(), Some("stl"));
        assert_eq!(row.metadata, None);
        assert_eq!(row.diagnostics, r#"[{"stage":"classify","kind":"malformed","message":"bad header"}]"#);
    }

    #[test]
    fn test_row_to_model() {
        let row = RecordRow {
            root: "/models".to_string(),
            path: "/models/a.stl".to_string(),
            file_size: 684,
            modified_ns: 1_700_000_000_123_456_789,
            content_hash: Some("af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string()),
            format: Some("stl".to_string()),
            status: "parsed".to_string(),
            metadata: Some(r#"{"objects":1,"primitives":12,"vertices":36}"#.to_string()),
            thumbnail: Some("af/af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262-256.png".to_string()),
            diagnostics: "[]".to_string(),
        };
        let record = FileRecord::try_from(row).unwrap();
        assert_eq!(record.status, Status::Parsed);
        assert_eq!(record.format, Some(Format::Stl));
        assert_eq!(record.metadata.unwrap().primitives, 12);
        assert_eq!(record.fingerprint.modified_ns, 1_700_000_000_123_456_789);
    }

    #[test]
    fn test_row_with_unknown_status_is_invalid() {
        let row = RecordRow {
            root: "/".to_string(),
            path: "/x".to_string(),
            file_size: 0,
            modified_ns: 0,
            content_hash: None,
            format: None,
            status: "exploded".to_string(),
            metadata: None,
            thumbnail: None,
            diagnostics: "[]".to_string(),
        };
        let err = FileRecord::try_from(row).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("status"));
    }
}

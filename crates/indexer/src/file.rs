//! Indexing a single file: staleness check, classification, extraction,
//! thumbnail and catalog write, all on the calling worker.

use crate::error::{ErrorKind, Result};
use crate::scan::Candidate;
use cadventory_catalog::{Diagnostic, DiagnosticKind, FileRecord, Fingerprint, Repository, Stage, Status};
use cadventory_format::{Classification, Format, HEADER_LEN, classify};
use cadventory_kernel::error::ErrorKind as KernelErrorKind;
use cadventory_kernel::{Extraction, KernelHandle};
use cadventory_thumbnail::Thumbnailer;
use exn::ResultExt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// How much work was needed to settle a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effort {
    /// The stored record still describes the file (same size and mtime, or
    /// same content hash). Nothing was extracted.
    Unchanged,
    /// Identical content was already parsed at another path; its metadata
    /// and thumbnail were copied.
    Reused,
    /// Settled by classification alone, without calling the kernel.
    Classified,
    /// The kernel was called.
    Extracted,
}

/// A settled file and what it took to get there.
#[derive(Debug)]
pub(crate) struct Indexed {
    pub record: FileRecord,
    pub effort: Effort,
}

/// Everything a worker needs, shared by all workers of a run.
pub(crate) struct Context {
    pub root: PathBuf,
    pub repo: Repository,
    pub kernel: KernelHandle,
    pub thumbnailer: Thumbnailer,
    pub timeout: Duration,
}

async fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}

async fn hash_file(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(std::fs::File::open(&path)?)?;
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .map_err(io::Error::other)?
}

/// Status and diagnostic for a failed kernel call.
fn extract_failure(kind: &KernelErrorKind) -> (Status, Diagnostic) {
    let (status, diagnostic) = match kind {
        KernelErrorKind::Malformed(_) => (Status::ParseFailed, DiagnosticKind::Malformed),
        KernelErrorKind::Timeout(_) => (Status::ParseFailed, DiagnosticKind::Timeout),
        KernelErrorKind::KernelCrash(_) => (Status::ParseFailed, DiagnosticKind::KernelCrash),
        KernelErrorKind::Io => (Status::ParseFailed, DiagnosticKind::Io),
        KernelErrorKind::UnsupportedFeature(_) => (Status::Unsupported, DiagnosticKind::UnsupportedFeature),
        KernelErrorKind::KernelNotFound => (Status::Unsupported, DiagnosticKind::KernelUnavailable),
    };
    (status, Diagnostic::new(Stage::Extract, diagnostic, kind.to_string()))
}

fn settle(record: FileRecord, status: Status, diagnostic: Diagnostic) -> FileRecord {
    match status {
        Status::Unsupported => record.unsupported(diagnostic),
        _ => record.failed(diagnostic),
    }
}

/// Settle `candidate` and write its record.
///
/// Per-file problems end up as diagnostics on the record. The only error is
/// [`ErrorKind::Store`], when the catalog itself fails.
pub(crate) async fn index_file(ctx: &Context, candidate: Candidate) -> Result<Indexed> {
    let Candidate { path, size, modified_ns } = candidate;
    let fingerprint = Fingerprint::new(size, modified_ns);
    let stored = match ctx.repo.get(&ctx.root, &path).await.or_raise(|| ErrorKind::Store)? {
        Some(stored) if stored.is_transient_failure() => {
            tracing::debug!(path = %path.display(), "Retrying after a transient failure");
            None
        },
        stored => stored,
    };
    if let Some(stored) = &stored
        && stored.fingerprint.same_stat(&fingerprint)
    {
        tracing::debug!(path = %path.display(), "Unchanged since last run");
        return Ok(Indexed { record: stored.clone(), effort: Effort::Unchanged });
    }

    let (record, effort) = settle_changed(ctx, &path, fingerprint, stored).await?;
    ctx.repo.upsert(&ctx.root, &record).await.or_raise(|| ErrorKind::Store)?;
    tracing::debug!(path = %path.display(), status = %record.status, ?effort, "File indexed");
    Ok(Indexed { record, effort })
}

async fn settle_changed(
    ctx: &Context,
    path: &Path,
    fingerprint: Fingerprint,
    stored: Option<FileRecord>,
) -> Result<(FileRecord, Effort)> {
    // Only files with a recognized extension are ever opened.
    let claimed = Format::from_path(path);
    let header = match claimed {
        Some(_) => read_header(path).await,
        None => Ok(Vec::new()),
    };
    let pending = FileRecord::pending(path, fingerprint, claimed);
    let header = match header {
        Ok(header) => header,
        Err(err) => {
            let diagnostic = Diagnostic::new(Stage::Classify, DiagnosticKind::Io, err.to_string());
            return Ok((pending.failed(diagnostic), Effort::Classified));
        },
    };
    let format = match classify(path, &header, pending.fingerprint.size) {
        Classification::Recognized(format) => format,
        Classification::Rejected(_, reason) => {
            let diagnostic = Diagnostic::new(Stage::Classify, DiagnosticKind::Malformed, reason.to_string());
            return Ok((pending.failed(diagnostic), Effort::Classified));
        },
        Classification::Unknown => {
            let diagnostic = Diagnostic::new(Stage::Classify, DiagnosticKind::Unrecognized, "not a recognized model format");
            return Ok((pending.unsupported(diagnostic), Effort::Classified));
        },
    };

    let hash = match hash_file(path).await {
        Ok(hash) => hash,
        Err(err) => {
            let diagnostic = Diagnostic::new(Stage::Classify, DiagnosticKind::Io, err.to_string());
            return Ok((pending.failed(diagnostic), Effort::Classified));
        },
    };
    let fingerprint = pending.fingerprint.clone().with_content_hash(&hash);

    // Touched but not modified: keep what we had, under the new fingerprint.
    if let Some(stored) = stored
        && stored.fingerprint.content_hash.as_deref() == Some(hash.as_str())
    {
        return Ok((FileRecord { fingerprint, ..stored }, Effort::Unchanged));
    }
    let pending = FileRecord { fingerprint, ..pending };

    let twin = ctx.repo.find_parsed_by_content_hash(&hash).await.or_raise(|| ErrorKind::Store)?;
    if let Some(twin) = twin
        && let Some(metadata) = twin.metadata
    {
        tracing::debug!(path = %path.display(), twin = %twin.path.display(), "Reusing identical content");
        let record = twin
            .diagnostics
            .into_iter()
            .filter(|d| d.stage == Stage::Render)
            .fold(pending.parsed(metadata, twin.thumbnail), FileRecord::with_diagnostic);
        return Ok((record, Effort::Reused));
    }

    let extraction = tokio::time::timeout(ctx.timeout, ctx.kernel.parse(path, format, ctx.timeout)).await;
    let record = match extraction {
        Ok(Ok(extraction)) => render(ctx, pending, &hash, extraction).await,
        Ok(Err(err)) => {
            let (status, diagnostic) = extract_failure(&err);
            settle(pending, status, diagnostic)
        },
        // The kernel ignored its own deadline.
        Err(_elapsed) => {
            let (status, diagnostic) = extract_failure(&KernelErrorKind::Timeout(ctx.timeout));
            settle(pending, status, diagnostic)
        },
    };
    Ok((record, Effort::Extracted))
}

async fn render(ctx: &Context, pending: FileRecord, hash: &str, extraction: Extraction) -> FileRecord {
    let Extraction { metadata, scene } = extraction;
    let thumbnailer = ctx.thumbnailer.clone();
    let fingerprint = hash.to_string();
    let rendered = tokio::task::spawn_blocking(move || thumbnailer.thumbnail(&fingerprint, &scene)).await;
    match rendered {
        Ok(Ok(output)) => pending.parsed(metadata, Some(output.into_reference())),
        Ok(Err(err)) => {
            tracing::debug!(path = %pending.path.display(), error = %*err, "Thumbnail not rendered");
            let diagnostic = Diagnostic::new(Stage::Render, DiagnosticKind::Render, err.to_string());
            pending.parsed(metadata, None).with_diagnostic(diagnostic)
        },
        Err(join) => {
            let diagnostic = Diagnostic::new(Stage::Render, DiagnosticKind::Render, format!("renderer failed: {join}"));
            pending.parsed(metadata, None).with_diagnostic(diagnostic)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadventory_catalog::Database;
    use cadventory_kernel::KernelRouter;
    use cadventory_thumbnail::ThumbnailStore;
    use rstest::rstest;
    use std::sync::Arc;

    const CUBE: &str = "solid cube
facet normal 0 0 -1
outer loop
vertex 0 0 0
vertex 1 1 0
vertex 1 0 0
endloop
endfacet
facet normal 0 -1 0
outer loop
vertex 0 0 0
vertex 1 0 0
vertex 1 0 1
endloop
endfacet
endsolid cube
";

    async fn context(dir: &Path) -> Context {
        let repo = Repository::from(&Database::connect_in_memory().await.unwrap());
        let store = ThumbnailStore::open(dir.join(".thumbs")).unwrap();
        Context {
            root: dir.to_path_buf(),
            repo,
            kernel: Arc::new(KernelRouter::new(None)),
            thumbnailer: Thumbnailer::new(store, 32).unwrap(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Gives up on every file, as an overloaded kernel would.
    struct TimingOutKernel;

    #[async_trait::async_trait]
    impl cadventory_kernel::Kernel for TimingOutKernel {
        fn name(&self) -> &str {
            "timing-out"
        }

        async fn parse(
            &self,
            _path: &Path,
            _format: Format,
            timeout: Duration,
        ) -> cadventory_kernel::error::Result<Extraction> {
            exn::bail!(KernelErrorKind::Timeout(timeout))
        }
    }

    fn candidate(path: &Path) -> Candidate {
        let metadata = std::fs::metadata(path).unwrap();
        Candidate { path: path.to_path_buf(), size: metadata.len(), modified_ns: 1_000 }
    }

    #[rstest]
    #[case(KernelErrorKind::Malformed("bad".into()), Status::ParseFailed, DiagnosticKind::Malformed)]
    #[case(KernelErrorKind::Timeout(Duration::from_secs(1)), Status::ParseFailed, DiagnosticKind::Timeout)]
    #[case(KernelErrorKind::KernelCrash("sigsegv".into()), Status::ParseFailed, DiagnosticKind::KernelCrash)]
    #[case(KernelErrorKind::UnsupportedFeature("nurbs".into()), Status::Unsupported, DiagnosticKind::UnsupportedFeature)]
    #[case(KernelErrorKind::KernelNotFound, Status::Unsupported, DiagnosticKind::KernelUnavailable)]
    fn test_extract_failure_mapping(
        #[case] kind: KernelErrorKind,
        #[case] status: Status,
        #[case] diagnostic: DiagnosticKind,
    ) {
        let (actual_status, actual) = extract_failure(&kind);
        assert_eq!(actual_status, status);
        assert_eq!(actual.kind, diagnostic);
        assert_eq!(actual.stage, Stage::Extract);
    }

    #[tokio::test]
    async fn test_well_formed_mesh_is_parsed_with_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("cube.stl");
        std::fs::write(&path, CUBE).unwrap();
        let indexed = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(indexed.effort, Effort::Extracted);
        assert_eq!(indexed.record.status, Status::Parsed);
        assert_eq!(indexed.record.metadata.as_ref().unwrap().primitives, 2);
        let thumbnail = indexed.record.thumbnail.as_deref().unwrap();
        assert!(ctx.thumbnailer.store().contains(thumbnail));
        assert_eq!(ctx.repo.get(dir.path(), &path).await.unwrap(), Some(indexed.record));
    }

    #[tokio::test]
    async fn test_second_pass_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("cube.stl");
        std::fs::write(&path, CUBE).unwrap();
        let first = index_file(&ctx, candidate(&path)).await.unwrap();
        let second = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(second.effort, Effort::Unchanged);
        assert_eq!(second.record, first.record);
    }

    #[tokio::test]
    async fn test_touched_file_keeps_record_under_new_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("cube.stl");
        std::fs::write(&path, CUBE).unwrap();
        let first = index_file(&ctx, candidate(&path)).await.unwrap();
        let touched = Candidate { modified_ns: 2_000, ..candidate(&path) };
        let second = index_file(&ctx, touched).await.unwrap();
        assert_eq!(second.effort, Effort::Unchanged);
        assert_eq!(second.record.fingerprint.modified_ns, 2_000);
        assert_eq!(second.record.metadata, first.record.metadata);
    }

    #[tokio::test]
    async fn test_duplicate_content_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let original = dir.path().join("cube.stl");
        let copy = dir.path().join("copy.stl");
        std::fs::write(&original, CUBE).unwrap();
        std::fs::write(&copy, CUBE).unwrap();
        let first = index_file(&ctx, candidate(&original)).await.unwrap();
        let second = index_file(&ctx, candidate(&copy)).await.unwrap();
        assert_eq!(second.effort, Effort::Reused);
        assert_eq!(second.record.thumbnail, first.record.thumbnail);
        assert_eq!(second.record.fingerprint.content_hash, first.record.fingerprint.content_hash);
    }

    #[tokio::test]
    async fn test_corrupt_header_is_malformed_without_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("broken.stl");
        std::fs::write(&path, b"\x00\x01\x02 definitely not a mesh").unwrap();
        let indexed = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(indexed.effort, Effort::Classified);
        assert_eq!(indexed.record.status, Status::ParseFailed);
        assert_eq!(indexed.record.diagnostics[0].kind, DiagnosticKind::Malformed);
        assert_eq!(indexed.record.fingerprint.content_hash, None);
    }

    #[tokio::test]
    async fn test_unknown_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"solid cube").unwrap();
        let indexed = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(indexed.record.status, Status::Unsupported);
        assert_eq!(indexed.record.format, None);
        assert_eq!(indexed.record.diagnostics[0].kind, DiagnosticKind::Unrecognized);
    }

    #[tokio::test]
    async fn test_parsed_without_geometry_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("empty.stl");
        std::fs::write(&path, "solid empty\nendsolid empty\n").unwrap();
        let indexed = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(indexed.record.status, Status::Parsed);
        assert!(indexed.record.metadata.is_some());
        assert_eq!(indexed.record.thumbnail, None);
        assert_eq!(indexed.record.diagnostics.last().unwrap().kind, DiagnosticKind::Render);
    }

    #[tokio::test]
    async fn test_timed_out_file_is_retried_although_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let path = dir.path().join("cube.stl");
        std::fs::write(&path, CUBE).unwrap();
        let overloaded = Context {
            root: ctx.root.clone(),
            repo: ctx.repo.clone(),
            kernel: Arc::new(TimingOutKernel),
            thumbnailer: ctx.thumbnailer.clone(),
            timeout: ctx.timeout,
        };
        let first = index_file(&overloaded, candidate(&path)).await.unwrap();
        assert_eq!(first.record.diagnostics[0].kind, DiagnosticKind::Timeout);

        let second = index_file(&ctx, candidate(&path)).await.unwrap();
        assert_eq!(second.effort, Effort::Extracted);
        assert_eq!(second.record.status, Status::Parsed);
        assert_eq!(ctx.repo.get(dir.path(), &path).await.unwrap(), Some(second.record));
    }

    #[tokio::test]
    async fn test_format_without_kernel_is_retried_but_malformed_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let part = dir.path().join("part.step");
        let broken = dir.path().join("broken.stl");
        std::fs::write(&part, "ISO-10303-21;\nHEADER;\nENDSEC;\n").unwrap();
        std::fs::write(&broken, b"\x00\x01\x02 definitely not a mesh").unwrap();

        let first = index_file(&ctx, candidate(&part)).await.unwrap();
        assert_eq!(first.record.status, Status::Unsupported);
        assert_eq!(first.record.diagnostics[0].kind, DiagnosticKind::KernelUnavailable);
        let again = index_file(&ctx, candidate(&part)).await.unwrap();
        assert_eq!(again.effort, Effort::Extracted);

        index_file(&ctx, candidate(&broken)).await.unwrap();
        let again = index_file(&ctx, candidate(&broken)).await.unwrap();
        assert_eq!(again.effort, Effort::Unchanged);
    }
}

//! Directory Scanner.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::Stream;
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};

/// A regular file found by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path, built from the (canonical) root and entry names.
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: i64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    ignore_extensions: HashSet<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { include_hidden: false, follow_symlinks: true, ignore_extensions: HashSet::new() }
    }
}

impl ScanOptions {
    /// Never yield files with these extensions (case-insensitive, no dot).
    pub fn ignoring<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = extensions.into_iter().map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase());
        self.ignore_extensions.extend(normalized);
        self
    }

    fn is_ignored(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.ignore_extensions.contains(&e.to_ascii_lowercase()))
    }
}

enum WalkEntry {
    File(Candidate),
    Descend(PathBuf),
    Skip,
}

fn stat_error(path: &Path) -> impl FnOnce(std::io::Error) -> ErrorKind + '_ {
    move |e| ErrorKind::Stat(path.to_path_buf(), e.kind())
}

fn candidate(path: PathBuf, metadata: &Metadata) -> Result<Candidate> {
    let modified = metadata.modified().map_err(stat_error(&path))?;
    let modified_ns = i64::try_from(UtcDateTime::from(modified).unix_timestamp_nanos())
        .map_err(|_| ErrorKind::Stat(path.clone(), std::io::ErrorKind::InvalidData))?;
    Ok(Candidate { path, size: metadata.len(), modified_ns })
}

async fn process_entry(entry: DirEntry, options: &ScanOptions, visited: &mut HashSet<PathBuf>) -> Result<WalkEntry> {
    let path = entry.path();
    if !options.include_hidden && entry.file_name().to_string_lossy().starts_with('.') {
        return Ok(WalkEntry::Skip);
    }
    if path.to_str().is_none() {
        exn::bail!(ErrorKind::NonUtf8Path(path));
    }
    let file_type = entry.file_type().await.map_err(stat_error(&path))?;
    let metadata = if file_type.is_symlink() {
        if !options.follow_symlinks {
            return Ok(WalkEntry::Skip);
        }
        // Follows the link; a dangling link is reported here.
        fs::metadata(&path).await.map_err(stat_error(&path))?
    } else {
        entry.metadata().await.map_err(stat_error(&path))?
    };
    if metadata.is_dir() {
        let real = fs::canonicalize(&path).await.map_err(stat_error(&path))?;
        if !visited.insert(real) {
            tracing::debug!(path = %path.display(), "Directory already visited; skipping");
            return Ok(WalkEntry::Skip);
        }
        return Ok(WalkEntry::Descend(path));
    }
    if metadata.is_file() && !options.is_ignored(&path) {
        return Ok(WalkEntry::File(candidate(path, &metadata)?));
    }
    // Ignored extensions, sockets, FIFOs, devices.
    Ok(WalkEntry::Skip)
}

/// Walk `root` depth-first, yielding every candidate file.
///
/// Hidden entries, ignored extensions and anything that isn't a regular file
/// are skipped. Each directory is entered at most once by its resolved path,
/// so symlink cycles terminate. An entry that can't be read or has a name
/// that isn't UTF-8 is yielded as an error ([`ErrorKind::ReadDir`],
/// [`ErrorKind::Stat`] or [`ErrorKind::NonUtf8Path`]) and the walk goes on.
pub fn scan(root: impl Into<PathBuf>, options: ScanOptions) -> impl Stream<Item = Result<Candidate>> {
    let root = root.into();
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        let mut visited = HashSet::new();
        if let Ok(real) = fs::canonicalize(&root).await {
            visited.insert(real);
        }
        let mut stack = vec![root];
        'dirs: while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %current.display(), error = %err, "Could not read directory");
                    yield Err(exn::Exn::from(ErrorKind::ReadDir(current, err.kind())));
                    continue 'dirs;
                },
            };
            'entries: loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break 'entries,
                    Err(err) => {
                        tracing::warn!(path = %current.display(), error = %err, "Could not read directory");
                        yield Err(exn::Exn::from(ErrorKind::ReadDir(current.clone(), err.kind())));
                        break 'entries;
                    },
                };
                match process_entry(entry, &options, &mut visited).await {
                    Ok(WalkEntry::File(candidate)) => yield Ok(candidate),
                    Ok(WalkEntry::Descend(dir)) => stack.push(dir),
                    Ok(WalkEntry::Skip) => {},
                    Err(err) => {
                        tracing::warn!(error = %*err, "Could not inspect directory entry");
                        yield Err(err);
                    },
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(root: &Path, options: ScanOptions) -> (Vec<PathBuf>, Vec<ErrorKind>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();
        let stream = scan(root, options);
        futures::pin_mut!(stream);
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(candidate) => files.push(candidate.path),
                Err(err) => errors.push((*err).clone()),
            }
        }
        files.sort();
        (files, errors)
    }

    fn touch(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("a.stl"), b"solid a");
        touch(&root.join("parts/b.obj"), b"v 0 0 0");
        touch(&root.join("parts/deep/c.txt"), b"notes");
        let (files, errors) = collect(&root, ScanOptions::default()).await;
        assert!(errors.is_empty());
        assert_eq!(files, vec![root.join("a.stl"), root.join("parts/b.obj"), root.join("parts/deep/c.txt")]);
    }

    #[tokio::test]
    async fn test_scan_reports_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.stl"), b"solid a");
        let stream = scan(dir.path(), ScanOptions::default());
        futures::pin_mut!(stream);
        let candidate = stream.next().await.unwrap().unwrap();
        assert_eq!(candidate.size, 7);
        assert!(candidate.modified_ns > 0);
    }

    #[tokio::test]
    async fn test_scan_skips_hidden_and_ignored_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join(".hidden.stl"), b"solid");
        touch(&root.join(".git/objects/x.stl"), b"solid");
        touch(&root.join("model.stl.swp"), b"junk");
        touch(&root.join("model.STL.BAK"), b"junk");
        touch(&root.join("model.stl"), b"solid");
        let options = ScanOptions::default().ignoring(["swp", ".bak"]);
        let (files, _) = collect(root, options).await;
        assert_eq!(files, vec![root.join("model.stl")]);
    }

    #[tokio::test]
    async fn test_scan_includes_hidden_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".hidden.stl"), b"solid");
        let options = ScanOptions { include_hidden: true, ..Default::default() };
        let (files, _) = collect(dir.path(), options).await;
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_reports_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let (files, errors) = collect(&missing, ScanOptions::default()).await;
        assert!(files.is_empty());
        assert_eq!(errors, vec![ErrorKind::ReadDir(missing, std::io::ErrorKind::NotFound)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_survives_symlink_cycles_and_broken_links() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("sub/a.stl"), b"solid");
        std::os::unix::fs::symlink(&root, root.join("sub/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("nowhere.stl"), root.join("broken.stl")).unwrap();
        let (files, errors) = collect(&root, ScanOptions::default()).await;
        assert_eq!(files, vec![root.join("sub/a.stl")]);
        assert!(matches!(errors.as_slice(), [ErrorKind::Stat(path, _)] if path == &root.join("broken.stl")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_can_ignore_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("real/a.stl"), b"solid");
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        let followed = collect(&root, ScanOptions::default()).await.0;
        // The link and its target resolve to the same directory: one visit.
        assert_eq!(followed.len(), 1);
        let options = ScanOptions { follow_symlinks: false, ..Default::default() };
        assert_eq!(collect(&root, options).await.0, vec![root.join("real/a.stl")]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_scan_reports_names_that_are_not_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let odd = root.join(OsStr::from_bytes(b"caf\xe9.stl"));
        touch(&odd, b"solid");
        touch(&root.join(OsStr::from_bytes(b"d\xefr/inside.stl")), b"solid");
        touch(&root.join("a.stl"), b"solid");
        let (files, errors) = collect(&root, ScanOptions::default()).await;
        assert_eq!(files, vec![root.join("a.stl")]);
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ErrorKind::NonUtf8Path(odd)));
    }
}

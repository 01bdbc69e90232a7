use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory of PNG thumbnails addressed by content fingerprint.
///
/// Layout: `<root>/<first two hash chars>/<hash>-<size>.png`. References
/// handed out to callers are relative to the root, so the store can be moved
/// without rewriting the catalog.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    root: PathBuf,
}

impl ThumbnailStore {
    /// Open (and create if missing) a thumbnail store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).or_raise(|| ErrorKind::Io(root.clone()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative reference for the thumbnail of `fingerprint` at `size` pixels.
    pub fn reference(fingerprint: &str, size: u32) -> Result<String> {
        let valid = fingerprint.len() >= 8 && fingerprint.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            exn::bail!(ErrorKind::InvalidFingerprint(fingerprint.to_string()));
        }
        let fingerprint = fingerprint.to_ascii_lowercase();
        Ok(format!("{}/{fingerprint}-{size}.png", &fingerprint[..2]))
    }

    /// Absolute location of a reference returned by [`reference`](Self::reference).
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.resolve(reference).is_file()
    }

    /// Atomically write `png` under `reference`.
    ///
    /// The bytes go to a temporary file in the destination directory first
    /// and are renamed into place, so readers never see a partial image.
    pub fn persist(&self, reference: &str, png: &[u8]) -> Result<PathBuf> {
        let target = self.resolve(reference);
        let directory = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(directory).or_raise(|| ErrorKind::Io(directory.to_path_buf()))?;
        let mut tmp = NamedTempFile::new_in(directory).or_raise(|| ErrorKind::Io(directory.to_path_buf()))?;
        tmp.write_all(png).or_raise(|| ErrorKind::Io(tmp.path().to_path_buf()))?;
        tmp.persist(&target).or_raise(|| ErrorKind::Io(target.clone()))?;
        Ok(target)
    }
}

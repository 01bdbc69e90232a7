use crate::record::{FileRecord, Status};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Every record for one root, keyed by absolute path.
///
/// Ordered by path, so two snapshots of the same catalog state serialize to
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    root: PathBuf,
    records: BTreeMap<PathBuf, FileRecord>,
}

impl CatalogSnapshot {
    pub(crate) fn new(root: impl Into<PathBuf>, records: impl IntoIterator<Item = FileRecord>) -> Self {
        let records = records.into_iter().map(|record| (record.path.clone(), record)).collect();
        Self { root: root.into(), records }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileRecord> {
        self.records.get(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn count(&self, status: Status) -> usize {
        self.iter().filter(|record| record.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileRecord> {
        self.iter().filter(|record| record.is_failure())
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        self.records.into_values().collect()
    }
}

impl<'a> IntoIterator for &'a CatalogSnapshot {
    type Item = &'a FileRecord;
    type IntoIter = std::collections::btree_map::Values<'a, PathBuf, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}

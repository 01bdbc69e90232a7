//! Reads and writes of [`FileRecord`]s.
//!
//! Records are scoped by the root directory they were indexed under, so one
//! database can hold several independently indexed trees. The key within a
//! root is the file's absolute path.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::RecordRow;
use crate::record::FileRecord;
use crate::snapshot::CatalogSnapshot;
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::instrument;

/// What [`Repository::prune`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Records deleted because their file is gone.
    pub removed: u64,
    /// Records kept but marked missing, because the directory that should
    /// contain them could not be read.
    pub tombstoned: u64,
    /// Previously tombstoned records whose file was seen again.
    pub restored: u64,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn sqlx_hates_paths(path: impl AsRef<Path>) -> Result<String> {
        Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Atomically insert or replace the record for `record.path` under `root`.
    ///
    /// The record must be settled (not [`Pending`](crate::Status::Pending))
    /// and consistent; see [`FileRecord::validate`]. Writing a record also
    /// clears any tombstone it had.
    pub async fn upsert(&self, root: impl AsRef<Path>, record: &FileRecord) -> Result<()> {
        record.validate()?;
        let row = RecordRow::try_from((root.as_ref(), record))?;
        sqlx::query(include_str!("../queries/upsert_record.sql"))
            .bind(row.root)
            .bind(row.path)
            .bind(row.file_size)
            .bind(row.modified_ns)
            .bind(row.content_hash)
            .bind(row.format)
            .bind(row.status)
            .bind(row.metadata)
            .bind(row.thumbnail)
            .bind(row.diagnostics)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get(&self, root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<Option<FileRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(include_str!("../queries/get_record.sql"))
            .bind(Self::sqlx_hates_paths(root)?)
            .bind(Self::sqlx_hates_paths(path)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    /// Every record for `path`, across all roots, as `(root, record)` pairs.
    ///
    /// A file is listed more than once when it lives under nested roots that
    /// were each indexed.
    pub async fn find_by_path(&self, path: impl AsRef<Path>) -> Result<Vec<(PathBuf, FileRecord)>> {
        let rows: Vec<RecordRow> = sqlx::query_as(include_str!("../queries/find_by_path.sql"))
            .bind(Self::sqlx_hates_paths(path)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::with_roots(rows)
    }

    /// Every record whose content hashes to `content_hash`, across all roots.
    pub async fn find_by_content_hash(&self, content_hash: impl AsRef<str>) -> Result<Vec<(PathBuf, FileRecord)>> {
        let rows: Vec<RecordRow> = sqlx::query_as(include_str!("../queries/find_by_content_hash.sql"))
            .bind(content_hash.as_ref())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::with_roots(rows)
    }

    /// A successfully parsed record with identical content, if any, preferring
    /// one that has a thumbnail.
    ///
    /// Used to copy metadata and thumbnail for duplicate files instead of
    /// extracting them again.
    pub async fn find_parsed_by_content_hash(&self, content_hash: impl AsRef<str>) -> Result<Option<FileRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(include_str!("../queries/find_parsed_by_content_hash.sql"))
            .bind(content_hash.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    /// All records under `root`.
    ///
    /// The snapshot is read with a single query, so it reflects one
    /// consistent state of the catalog even while workers are writing.
    pub async fn snapshot(&self, root: impl AsRef<Path>) -> Result<CatalogSnapshot> {
        let root = root.as_ref();
        let rows: Vec<RecordRow> = sqlx::query_as(include_str!("../queries/snapshot.sql"))
            .bind(Self::sqlx_hates_paths(root)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let records = rows.into_iter().map(FileRecord::try_from).collect::<Result<Vec<_>>>()?;
        Ok(CatalogSnapshot::new(root, records))
    }

    /// Every root that has at least one record.
    pub async fn list_roots(&self) -> Result<Vec<PathBuf>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/list_roots.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(root,)| PathBuf::from(root)).collect())
    }

    /// Paths under `root` currently marked missing.
    pub async fn list_missing(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/list_missing_for_root.sql"))
            .bind(Self::sqlx_hates_paths(root)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(path,)| PathBuf::from(path)).collect())
    }

    fn with_roots(rows: Vec<RecordRow>) -> Result<Vec<(PathBuf, FileRecord)>> {
        rows.into_iter()
            .map(|row| {
                let root = PathBuf::from(&row.root);
                Ok((root, FileRecord::try_from(row)?))
            })
            .collect()
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Reconcile the records under `root` with a complete scan.
    ///
    /// - records in `seen` are kept, and lose any tombstone;
    /// - unseen records below one of `unreadable` are tombstoned, since the
    ///   scan couldn't tell whether they still exist;
    /// - every other unseen record is deleted.
    ///
    /// All changes are applied in one transaction.
    #[instrument(skip(self, root, seen, unreadable), fields(root = %root.as_ref().display(), seen = seen.len()))]
    pub async fn prune(
        &self,
        root: impl AsRef<Path>,
        seen: &HashSet<PathBuf>,
        unreadable: &[PathBuf],
    ) -> Result<PruneOutcome> {
        let root = Self::sqlx_hates_paths(root)?;
        let now = UtcDateTime::now().unix_timestamp();
        let mut outcome = PruneOutcome::default();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let known: Vec<(String, Option<i64>)> = sqlx::query_as(include_str!("../queries/list_paths_for_root.sql"))
            .bind(root.as_str())
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for (path, missing_since) in known {
            let candidate = Path::new(&path);
            let query = if seen.contains(candidate) {
                if missing_since.is_none() {
                    continue;
                }
                outcome.restored += 1;
                sqlx::query(include_str!("../queries/clear_missing.sql"))
            } else if unreadable.iter().any(|dir| candidate.starts_with(dir)) {
                outcome.tombstoned += 1;
                sqlx::query(include_str!("../queries/mark_missing.sql")).bind(now)
            } else {
                outcome.removed += 1;
                sqlx::query(include_str!("../queries/delete_record.sql"))
            };
            query
                .bind(root.as_str())
                .bind(path.as_str())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(
            removed = outcome.removed,
            tombstoned = outcome.tombstoned,
            restored = outcome.restored,
            "Catalog pruned"
        );
        Ok(outcome)
    }
}

//! Opening the catalog database.

use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// Upserts from concurrent workers queue behind the single WAL writer for at
/// most this long before failing the run.
const WRITE_WAIT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the catalog database.
///
/// Hand it to [`Repository`](crate::Repository) via `From<&Database>` for
/// reads and writes.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the catalog at `path`, creating its parent directory
    /// and bringing the schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // Snapshot reads and `find` queries never wait for worker upserts.
            .journal_mode(SqliteJournalMode::Wal)
            // A record lost to a power cut is simply re-indexed next run.
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(WRITE_WAIT);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// Open an empty catalog that lives as long as the pool.
    ///
    /// Not gated behind `#[cfg(test)]` so that other crates can use it in
    /// their tests too.
    pub async fn connect_in_memory() -> Result<Self> {
        // Each connection to ":memory:" is a separate database.
        let options = SqliteConnectOptions::new().filename(":memory:");
        Self::open(options, 1).await
    }

    #[instrument("opening catalog", skip(options))]
    async fn open(options: SqliteConnectOptions, connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fold the write-ahead log back into the catalog file and close the pool.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(!db.pool().is_closed());
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopening_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite3");
        let db = Database::connect(&path).await.unwrap();
        sqlx::query(
            "INSERT INTO records (root, path, file_size, modified_ns, status, diagnostics)
             VALUES ('/r', '/r/a.txt', 1, 1, 'unsupported', '[{}]')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;

        let db = Database::connect(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records").fetch_one(db.pool()).await.unwrap();
        assert_eq!(count, 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_file_catalog_uses_wal_and_waits_for_writers() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("catalog.sqlite3")).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(db.pool()).await.unwrap();
        assert_eq!(mode, "wal");
        let (timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout").fetch_one(db.pool()).await.unwrap();
        assert_eq!(timeout, WRITE_WAIT.as_millis() as i64);
        db.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_writers_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("catalog.sqlite3")).await.unwrap();
        let mut writers = tokio::task::JoinSet::new();
        for i in 0..16 {
            let pool = db.pool().clone();
            writers.spawn(async move {
                sqlx::query(
                    "INSERT INTO records (root, path, file_size, modified_ns, status, diagnostics)
                     VALUES ('/r', ?, 1, 1, 'unsupported', '[{}]')",
                )
                .bind(format!("/r/{i}.txt"))
                .execute(&pool)
                .await
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined.unwrap().unwrap();
        }
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records").fetch_one(db.pool()).await.unwrap();
        assert_eq!(count, 16);
        db.close().await;
    }

    #[tokio::test]
    async fn test_connect_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/catalog.sqlite3");
        let db = Database::connect(&path).await.unwrap();
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_schema_rejects_metadata_on_failed_records() {
        let db = Database::connect_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO records (root, path, file_size, modified_ns, status, metadata, diagnostics)
             VALUES ('/r', '/r/a.stl', 1, 1, 'parse_failed', '{}', '[{}]')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
        db.close().await;
    }
}

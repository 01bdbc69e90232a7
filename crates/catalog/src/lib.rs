//! Durable catalog of indexed model files.
//!
//! The catalog maps each file (keyed by root and absolute path) to its
//! [`FileRecord`]: fingerprint, format, status, extracted metadata, thumbnail
//! reference and diagnostics. It is backed by SQLite and can always be
//! rebuilt by re-indexing, since the model files themselves are the source
//! of truth.
//!
//! # Guarantees
//! - every write is an atomic upsert of one fully formed record;
//! - only settled records are stored, and the schema enforces that
//!   metadata and thumbnails only exist on parsed records;
//! - a [`CatalogSnapshot`] is a consistent, path-ordered view of one root.

mod db;
pub mod error;
mod models;
mod record;
mod repo;
mod snapshot;

pub use crate::db::Database;
pub use crate::record::{Diagnostic, DiagnosticKind, FileRecord, Fingerprint, Stage, Status};
pub use crate::repo::{PruneOutcome, Repository};
pub use crate::snapshot::CatalogSnapshot;

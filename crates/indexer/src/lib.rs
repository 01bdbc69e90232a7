//! Concurrent indexing of a directory tree of CAD models.
//!
//! [`Indexer::begin_indexing`] starts a run in the background and hands back
//! an [`IndexingHandle`] for progress, state and cancellation. Each file is
//! settled into exactly one catalog record; problems with individual files
//! become diagnostics on their record and never abort the run.

pub mod error;
mod file;
mod run;
mod scan;
mod summary;

pub use crate::file::Effort;
pub use crate::run::{Indexer, IndexerOptions, IndexingHandle, Progress, RunState};
pub use crate::scan::{Candidate, ScanOptions, scan};
pub use crate::summary::{EffortCounts, Failure, IndexingSummary, ScanFailure, StatusCounts};

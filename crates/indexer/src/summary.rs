use crate::file::Effort;
use crate::run::RunState;
use cadventory_catalog::{Diagnostic, FileRecord, PruneOutcome, Status};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How many failing files the text form lists before summarizing the rest.
const SHOWN_FAILURES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub parsed: u64,
    pub parse_failed: u64,
    pub unsupported: u64,
}

impl StatusCounts {
    pub(crate) fn add(&mut self, status: Status) {
        match status {
            Status::Parsed => self.parsed += 1,
            Status::ParseFailed => self.parse_failed += 1,
            Status::Unsupported => self.unsupported += 1,
            // Workers only hand back settled records.
            Status::Pending => {},
        }
    }

    pub fn get(&self, status: Status) -> u64 {
        match status {
            Status::Parsed => self.parsed,
            Status::ParseFailed => self.parse_failed,
            Status::Unsupported => self.unsupported,
            Status::Pending => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffortCounts {
    pub unchanged: u64,
    pub reused: u64,
    pub classified: u64,
    pub extracted: u64,
}

impl EffortCounts {
    pub(crate) fn add(&mut self, effort: Effort) {
        match effort {
            Effort::Unchanged => self.unchanged += 1,
            Effort::Reused => self.reused += 1,
            Effort::Classified => self.classified += 1,
            Effort::Extracted => self.extracted += 1,
        }
    }
}

/// A file that settled without metadata, either [`Status::ParseFailed`] or
/// [`Status::Unsupported`], with the reasons recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: PathBuf,
    pub status: Status,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<&FileRecord> for Failure {
    fn from(record: &FileRecord) -> Self {
        Self { path: record.path.clone(), status: record.status, diagnostics: record.diagnostics.clone() }
    }
}

/// A path the scanner could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of one indexing run, produced exactly once when it ends.
///
/// The catalog snapshot remains the authoritative result; this is the
/// aggregate view of what the run did.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingSummary {
    pub root: PathBuf,
    /// [`RunState::Completed`] or [`RunState::Cancelled`].
    pub state: RunState,
    pub elapsed: Duration,
    /// Candidate files found by the scanner.
    pub seen: u64,
    /// Candidate files settled by a worker. Never more than `seen`.
    pub processed: u64,
    pub statuses: StatusCounts,
    pub effort: EffortCounts,
    /// `None` when the run was cancelled and the catalog left as it was.
    pub pruned: Option<PruneOutcome>,
    pub scan_failures: Vec<ScanFailure>,
    /// Files that failed to parse or were unsupported, ordered by path.
    pub failures: Vec<Failure>,
}

impl IndexingSummary {
    pub fn is_cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }
}

impl fmt::Display for IndexingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Indexed {} ({}) in {:.2}s", self.root.display(), self.state, self.elapsed.as_secs_f64())?;
        writeln!(f, "  files:   {} seen, {} processed", self.seen, self.processed)?;
        let StatusCounts { parsed, parse_failed, unsupported } = self.statuses;
        writeln!(f, "  status:  {parsed} parsed, {parse_failed} parse failed, {unsupported} unsupported")?;
        let EffortCounts { unchanged, reused, classified, extracted } = self.effort;
        writeln!(
            f,
            "  effort:  {unchanged} unchanged, {reused} reused, {classified} classified, {extracted} extracted"
        )?;
        match self.pruned {
            Some(PruneOutcome { removed, tombstoned, restored }) => {
                writeln!(f, "  catalog: {removed} removed, {tombstoned} marked missing, {restored} restored")?;
            },
            None => writeln!(f, "  catalog: not pruned")?,
        }
        if !self.scan_failures.is_empty() {
            writeln!(f, "Scan errors ({}):", self.scan_failures.len())?;
            for failure in self.scan_failures.iter().take(SHOWN_FAILURES) {
                writeln!(f, "  {}: {}", failure.path.display(), failure.message)?;
            }
            if let Some(more) = self.scan_failures.len().checked_sub(SHOWN_FAILURES).filter(|n| *n > 0) {
                writeln!(f, "  … and {more} more")?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures ({}):", self.failures.len())?;
            for failure in self.failures.iter().take(SHOWN_FAILURES) {
                writeln!(f, "  {} ({})", failure.path.display(), failure.status)?;
                for diagnostic in &failure.diagnostics {
                    writeln!(f, "    {diagnostic}")?;
                }
            }
            if let Some(more) = self.failures.len().checked_sub(SHOWN_FAILURES).filter(|n| *n > 0) {
                writeln!(f, "  … and {more} more")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadventory_catalog::{DiagnosticKind, Stage};

    fn summary(failures: usize) -> IndexingSummary {
        let failures = (0..failures)
            .map(|i| Failure {
                path: PathBuf::from(format!("/models/broken-{i:02}.stl")),
                status: Status::ParseFailed,
                diagnostics: vec![Diagnostic::new(Stage::Classify, DiagnosticKind::Malformed, "file is empty")],
            })
            .collect::<Vec<_>>();
        IndexingSummary {
            root: PathBuf::from("/models"),
            state: RunState::Completed,
            elapsed: Duration::from_millis(1500),
            seen: 3,
            processed: 3,
            statuses: StatusCounts { parsed: 1, parse_failed: 1, unsupported: 1 },
            effort: EffortCounts { unchanged: 0, reused: 0, classified: 2, extracted: 1 },
            pruned: Some(PruneOutcome::default()),
            scan_failures: Vec::new(),
            failures,
        }
    }

    #[test]
    fn test_text_form_lists_counts_and_failures() {
        let text = summary(1).to_string();
        assert!(text.starts_with("Indexed /models (completed) in 1.50s\n"));
        assert!(text.contains("1 parsed, 1 parse failed, 1 unsupported"));
        assert!(text.contains("  /models/broken-00.stl (parse_failed)\n    [classify/malformed] file is empty\n"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn test_text_form_lists_unsupported_files_with_reasons() {
        let mut summary = summary(0);
        summary.failures.push(Failure {
            path: PathBuf::from("/models/notes.txt"),
            status: Status::Unsupported,
            diagnostics: vec![Diagnostic::new(
                Stage::Classify,
                DiagnosticKind::Unrecognized,
                "not a recognized model format",
            )],
        });
        let text = summary.to_string();
        assert!(text.contains("Failures (1):\n"));
        assert!(text.contains(
            "  /models/notes.txt (unsupported)\n    [classify/unrecognized] not a recognized model format\n"
        ));
    }

    #[test]
    fn test_text_form_truncates_long_failure_lists() {
        let text = summary(13).to_string();
        assert!(text.contains("broken-09.stl"));
        assert!(!text.contains("broken-10.stl"));
        assert!(text.contains("… and 3 more"));
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(Status::Parsed);
        counts.add(Status::Parsed);
        counts.add(Status::Unsupported);
        assert_eq!(counts.get(Status::Parsed), 2);
        assert_eq!(counts.get(Status::Unsupported), 1);
        assert_eq!(counts.get(Status::ParseFailed), 0);
    }
}

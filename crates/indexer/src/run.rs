//! Indexing Orchestrator.
//!
//! One producer task walks the root and feeds a bounded queue; a fixed pool
//! of workers takes files off the queue and settles each one end to end
//! (classification, extraction, thumbnail, catalog write). The run task
//! aggregates worker results, emits throttled progress, prunes the catalog
//! and builds the [`IndexingSummary`].

use crate::error::{Error, ErrorKind, Result};
use crate::file::{Context, Indexed, index_file};
use crate::scan::{Candidate, ScanOptions, scan};
use crate::summary::{EffortCounts, Failure, IndexingSummary, ScanFailure, StatusCounts};
use cadventory_catalog::Repository;
use cadventory_kernel::KernelHandle;
use cadventory_thumbnail::Thumbnailer;
use derive_more::Display;
use exn::ResultExt;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const MAX_WORKERS: usize = 64;
/// Progress events are dropped rather than queued beyond this.
const PROGRESS_BUFFER: usize = 64;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    #[display("not started")]
    NotStarted,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    /// Stopped early on request. Not an error: a partial summary is produced.
    #[display("cancelled")]
    Cancelled,
    /// Aborted because the catalog could not be written.
    #[display("failed")]
    Failed,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

/// Periodic progress report. Counts never decrease within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: u64,
    pub seen: u64,
    /// The most recently settled file.
    pub current: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Deadline for a single kernel invocation.
    pub extract_timeout: Duration,
    /// Minimum time between progress events.
    pub progress_interval: Duration,
    /// Also report progress every this many files.
    pub progress_every: u64,
    pub scan: ScanOptions,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            queue_capacity: 256,
            extract_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(250),
            progress_every: 64,
            scan: ScanOptions::default(),
        }
    }
}

/// Entry point for indexing runs against one catalog.
#[derive(Clone)]
pub struct Indexer {
    repo: Repository,
    kernel: KernelHandle,
    thumbnailer: Thumbnailer,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(repo: Repository, kernel: KernelHandle, thumbnailer: Thumbnailer, options: IndexerOptions) -> Self {
        Self { repo, kernel, thumbnailer, options }
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    /// Start indexing `root` in the background and return immediately.
    ///
    /// Fails only if `root` isn't an existing directory with a UTF-8 path.
    /// Everything else is reported through the returned handle.
    pub async fn begin_indexing(&self, root: impl AsRef<Path>) -> Result<IndexingHandle> {
        let requested = root.as_ref();
        let root = tokio::fs::canonicalize(requested)
            .await
            .or_raise(|| ErrorKind::InvalidRoot(requested.to_path_buf()))?;
        let is_dir = tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir());
        if !is_dir || root.to_str().is_none() {
            exn::bail!(ErrorKind::InvalidRoot(requested.to_path_buf()));
        }

        let (state_tx, state) = watch::channel(RunState::NotStarted);
        let (progress_tx, progress) = mpsc::channel(PROGRESS_BUFFER);
        let cancel = CancellationToken::new();
        let run = Run {
            ctx: Arc::new(Context {
                root: root.clone(),
                repo: self.repo.clone(),
                kernel: self.kernel.clone(),
                thumbnailer: self.thumbnailer.clone(),
                timeout: self.options.extract_timeout,
            }),
            options: self.options.clone(),
            cancel: cancel.clone(),
            progress: progress_tx,
        };
        let task = tokio::spawn(async move {
            state_tx.send_replace(RunState::Running);
            let result = run.execute().await;
            state_tx.send_replace(match &result {
                Ok(summary) => summary.state,
                Err(_) => RunState::Failed,
            });
            result
        });
        Ok(IndexingHandle { root, state, progress: Some(progress), cancel, task })
    }

    /// Index `root` and wait for the summary.
    pub async fn index(&self, root: impl AsRef<Path>) -> Result<IndexingSummary> {
        self.begin_indexing(root).await?.wait().await
    }
}

/// A running (or finished) indexing run.
pub struct IndexingHandle {
    root: PathBuf,
    state: watch::Receiver<RunState>,
    progress: Option<mpsc::Receiver<Progress>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<IndexingSummary>>,
}

impl IndexingHandle {
    /// The canonical root being indexed.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// A receiver that is notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Take the progress receiver. Only the first call returns it.
    pub fn progress(&mut self) -> Option<mpsc::Receiver<Progress>> {
        self.progress.take()
    }

    /// Ask the run to stop: no new files are started, files already being
    /// worked on finish (or time out), and a partial summary is produced.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to end. Consumes the handle, so the summary is
    /// delivered exactly once.
    ///
    /// A cancelled run is `Ok` with [`RunState::Cancelled`]; only a catalog
    /// failure (or a crashed run task) is an error.
    pub async fn wait(self) -> Result<IndexingSummary> {
        self.task.await.or_raise(|| ErrorKind::Worker)?
    }
}

enum Event {
    Discovered(PathBuf),
    ScanFailed(Error),
    Indexed(Result<Indexed>),
}

/// Running totals, owned by the run task.
#[derive(Default)]
struct Tally {
    seen: HashSet<PathBuf>,
    unreadable: Vec<PathBuf>,
    processed: u64,
    statuses: StatusCounts,
    effort: EffortCounts,
    scan_failures: Vec<ScanFailure>,
    failures: Vec<Failure>,
}

impl Tally {
    fn scan_failed(&mut self, err: &Error) {
        let path = match &**err {
            ErrorKind::ReadDir(path, _) | ErrorKind::Stat(path, _) => {
                // Whatever lies at or below an unreadable path is unconfirmed, not gone.
                self.unreadable.push(path.clone());
                path.clone()
            },
            // Never cataloged, so there is nothing to protect from pruning.
            ErrorKind::NonUtf8Path(path) => path.clone(),
            _ => return,
        };
        self.scan_failures.push(ScanFailure { path, message: (**err).to_string() });
    }

    fn indexed(&mut self, indexed: &Indexed) {
        self.processed += 1;
        self.statuses.add(indexed.record.status);
        self.effort.add(indexed.effort);
        if indexed.record.is_failure() {
            self.failures.push(Failure::from(&indexed.record));
        }
    }
}

struct Throttle {
    last: Option<Instant>,
    interval: Duration,
    every: u64,
}

impl Throttle {
    fn due(&mut self, processed: u64) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => last.elapsed() >= self.interval || (self.every > 0 && processed % self.every == 0),
        };
        if due {
            self.last = Some(Instant::now());
        }
        due
    }
}

struct Run {
    ctx: Arc<Context>,
    options: IndexerOptions,
    cancel: CancellationToken,
    progress: mpsc::Sender<Progress>,
}

impl Run {
    #[instrument(name = "indexing", skip(self), fields(root = %self.ctx.root.display(), workers = self.options.workers))]
    async fn execute(self) -> Result<IndexingSummary> {
        let started = Instant::now();
        tracing::info!("Indexing started");
        let (queue_tx, queue_rx) = mpsc::channel(self.options.queue_capacity.max(1));
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let producer = tokio::spawn(produce(
            self.ctx.root.clone(),
            self.options.scan.clone(),
            queue_tx,
            events_tx.clone(),
            self.cancel.clone(),
        ));
        let queue = Arc::new(Mutex::new(queue_rx));
        let mut workers = JoinSet::new();
        for _ in 0..self.options.workers.clamp(1, MAX_WORKERS) {
            workers.spawn(work(self.ctx.clone(), queue.clone(), events_tx.clone(), self.cancel.clone()));
        }
        drop(events_tx);

        let mut tally = Tally::default();
        let mut throttle =
            Throttle { last: None, interval: self.options.progress_interval, every: self.options.progress_every };
        let mut fatal = None;
        let mut current = self.ctx.root.clone();
        // Ends once the producer and every worker have dropped their sender.
        while let Some(event) = events.recv().await {
            match event {
                Event::Discovered(path) => {
                    tally.seen.insert(path);
                },
                Event::ScanFailed(err) => tally.scan_failed(&err),
                Event::Indexed(Ok(indexed)) => {
                    tally.indexed(&indexed);
                    current = indexed.record.path;
                    if throttle.due(tally.processed) {
                        self.report(&tally, &current);
                    }
                },
                Event::Indexed(Err(err)) => {
                    if fatal.is_none() {
                        tracing::error!(error = %*err, "Catalog write failed; stopping");
                        self.cancel.cancel();
                        fatal = Some(err);
                    }
                },
            }
        }
        producer.await.or_raise(|| ErrorKind::Worker)?;
        while let Some(joined) = workers.join_next().await {
            joined.or_raise(|| ErrorKind::Worker)?;
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        let state = if self.cancel.is_cancelled() { RunState::Cancelled } else { RunState::Completed };
        // A cancelled scan is incomplete, so it can't tell what was deleted.
        let pruned = match state {
            RunState::Completed => Some(
                self.ctx
                    .repo
                    .prune(&self.ctx.root, &tally.seen, &tally.unreadable)
                    .await
                    .or_raise(|| ErrorKind::Store)?,
            ),
            _ => None,
        };
        self.report(&tally, &current);

        let mut failures = tally.failures;
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        let summary = IndexingSummary {
            root: self.ctx.root.clone(),
            state,
            elapsed: started.elapsed(),
            seen: tally.seen.len() as u64,
            processed: tally.processed,
            statuses: tally.statuses,
            effort: tally.effort,
            pruned,
            scan_failures: tally.scan_failures,
            failures,
        };
        tracing::info!(
            state = %summary.state,
            seen = summary.seen,
            processed = summary.processed,
            parsed = summary.statuses.parsed,
            parse_failed = summary.statuses.parse_failed,
            unsupported = summary.statuses.unsupported,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Indexing finished"
        );
        Ok(summary)
    }

    fn report(&self, tally: &Tally, current: &Path) {
        let progress = Progress { processed: tally.processed, seen: tally.seen.len() as u64, current: current.to_path_buf() };
        // A slow (or absent) listener must never hold up the run.
        _ = self.progress.try_send(progress);
    }
}

async fn produce(
    root: PathBuf,
    options: ScanOptions,
    queue: mpsc::Sender<Candidate>,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let entries = scan(root, options);
    futures::pin_mut!(entries);
    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            entry = entries.next() => entry,
        };
        match entry {
            None => break,
            Some(Ok(candidate)) => {
                // Counted as seen before it is queued, so processed <= seen always.
                if events.send(Event::Discovered(candidate.path.clone())).is_err() {
                    break;
                }
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = queue.send(candidate) => sent,
                };
                if sent.is_err() {
                    break;
                }
            },
            Some(Err(err)) => {
                if events.send(Event::ScanFailed(err)).is_err() {
                    break;
                }
            },
        }
    }
}

async fn work(
    ctx: Arc<Context>,
    queue: Arc<Mutex<mpsc::Receiver<Candidate>>>,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                candidate = queue.recv() => candidate,
            }
        };
        let Some(candidate) = next else {
            break;
        };
        let result = index_file(&ctx, candidate).await;
        if events.send(Event::Indexed(result)).is_err() {
            break;
        }
    }
}

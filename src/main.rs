mod commands;
mod error;
mod logging;
mod progress;

use crate::commands::{Cli, Commands};
use crate::error::{ErrorKind, Result};
use cadventory_catalog::{Database, Repository, Status};
use cadventory_config::Config;
use cadventory_indexer::{Indexer, IndexerOptions, RunState, ScanOptions};
use cadventory_kernel::{Kernel, KernelRouter};
use cadventory_thumbnail::{ThumbnailStore, Thumbnailer};
use clap::Parser;
use exn::ResultExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Commands::Config = cli.command {
        let json = serde_json::to_string_pretty(&config).or_raise(|| ErrorKind::Output)?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    let db = Database::connect(&config.catalog.database).await.or_raise(|| ErrorKind::Catalog)?;
    let code = match cli.command {
        Commands::Index { root, workers, timeout } => index(&config, &db, &root, workers, timeout).await,
        Commands::Show { path } => show(&db, &path).await,
        Commands::List { root, status } => list(&db, &root, status).await,
        Commands::Find { hash } => find(&db, &hash).await,
        Commands::Config => Ok(ExitCode::SUCCESS),
    };
    db.close().await;
    code
}

fn indexer_options(config: &Config) -> IndexerOptions {
    IndexerOptions {
        workers: config.indexer.workers,
        queue_capacity: config.indexer.queue_capacity,
        extract_timeout: config.indexer.extract_timeout(),
        progress_interval: config.indexer.progress_interval(),
        progress_every: config.indexer.progress_every,
        scan: {
            let mut scan = ScanOptions::default();
            scan.include_hidden = config.scan.include_hidden;
            scan.follow_symlinks = config.scan.follow_symlinks;
            scan.ignoring(&config.scan.ignore_extensions)
        },
    }
}

async fn index(
    config: &Config,
    db: &Database,
    root: &Path,
    workers: Option<usize>,
    timeout: Option<u64>,
) -> Result<ExitCode> {
    let mut options = indexer_options(config);
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }
    if let Some(timeout) = timeout {
        options.extract_timeout = Duration::from_secs(timeout.max(1));
    }
    let store = ThumbnailStore::open(&config.catalog.thumbnails).or_raise(|| ErrorKind::Thumbnails)?;
    let thumbnailer = Thumbnailer::new(store, config.thumbnail.size).or_raise(|| ErrorKind::Thumbnails)?;
    let kernel = KernelRouter::from_program(config.kernel.program.as_deref(), config.kernel.args.clone());
    tracing::info!(kernel = kernel.name(), workers = options.workers, "Geometry kernel selected");

    let indexer = Indexer::new(Repository::from(db), Arc::new(kernel), thumbnailer, options);
    let mut handle = indexer.begin_indexing(root).await.or_raise(|| ErrorKind::Indexing)?;
    let spinner = handle.progress().map(|progress| tokio::spawn(progress::follow(progress)));
    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing files already in progress");
            cancel.cancel();
        }
    });

    let summary = handle.wait().await;
    interrupt.abort();
    if let Some(spinner) = spinner {
        // The channel closes with the run, so this returns promptly.
        _ = spinner.await;
    }
    let summary = summary.or_raise(|| ErrorKind::Indexing)?;
    print!("{summary}");
    Ok(match summary.state {
        RunState::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
        _ => ExitCode::SUCCESS,
    })
}

/// Canonical form of a user-supplied path, falling back to an absolute one
/// for files that no longer exist.
fn resolve(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(path) => Ok(path),
        Err(_) => std::path::absolute(path).or_raise(|| ErrorKind::Output),
    }
}

async fn show(db: &Database, path: &Path) -> Result<ExitCode> {
    let path = resolve(path)?;
    let records = Repository::from(db).find_by_path(&path).await.or_raise(|| ErrorKind::Catalog)?;
    if records.is_empty() {
        eprintln!("{} is not in the catalog", path.display());
        return Ok(ExitCode::FAILURE);
    }
    let entries: Vec<_> =
        records.iter().map(|(root, record)| serde_json::json!({ "root": root, "record": record })).collect();
    let json = serde_json::to_string_pretty(&entries).or_raise(|| ErrorKind::Output)?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

async fn list(db: &Database, root: &Path, status: Option<Status>) -> Result<ExitCode> {
    let root = resolve(root)?;
    let snapshot = Repository::from(db).snapshot(&root).await.or_raise(|| ErrorKind::Catalog)?;
    let mut out = std::io::stdout().lock();
    for record in snapshot.iter().filter(|r| status.is_none_or(|s| r.status == s)) {
        let format = record.format.map_or("-", |f| f.as_str());
        writeln!(out, "{:<12} {:<5} {}", record.status.as_str(), format, record.path.display())
            .or_raise(|| ErrorKind::Output)?;
        if record.is_failure() {
            for diagnostic in &record.diagnostics {
                writeln!(out, "{:<18} {diagnostic}", "").or_raise(|| ErrorKind::Output)?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn find(db: &Database, hash: &str) -> Result<ExitCode> {
    let records = Repository::from(db).find_by_content_hash(hash).await.or_raise(|| ErrorKind::Catalog)?;
    let mut out = std::io::stdout().lock();
    for (root, record) in &records {
        writeln!(out, "{}\t{}\t{}", record.status, root.display(), record.path.display())
            .or_raise(|| ErrorKind::Output)?;
    }
    Ok(if records.is_empty() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexer_options_follow_configuration() {
        let mut config = Config::default();
        config.indexer.workers = 3;
        config.indexer.extract_timeout = 9;
        config.scan.include_hidden = true;
        let options = indexer_options(&config);
        assert_eq!(options.workers, 3);
        assert_eq!(options.extract_timeout, Duration::from_secs(9));
        assert!(options.scan.include_hidden);
        assert!(options.scan.follow_symlinks);
    }
}

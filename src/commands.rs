use cadventory_catalog::Status;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cadventory", version)]
#[command(about = "Index directories of CAD models into a searchable catalog", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More logging; repeat for more detail. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index a directory tree, updating the catalog
    Index {
        root: PathBuf,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Seconds a single file may spend in the geometry kernel
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Print the catalog record(s) for a file as JSON
    Show { path: PathBuf },
    /// List the catalog records under an indexed root
    List {
        root: PathBuf,
        /// Only records with this status (parsed, parse_failed, unsupported)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<Status>,
    },
    /// List every file whose content has the given hash
    Find { hash: String },
    /// Print the effective configuration
    Config,
}

fn parse_status(value: &str) -> Result<Status, String> {
    match value.parse::<Status>() {
        Ok(Status::Pending) | Err(_) => Err(format!("expected one of: parsed, parse_failed, unsupported (got {value:?})")),
        Ok(status) => Ok(status),
    }
}

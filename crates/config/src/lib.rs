//! Layered configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults;
//! 2. a configuration file (TOML, YAML or JSON, chosen by extension), either
//!    given explicitly or `config.toml` in the platform config directory;
//! 3. environment variables prefixed with `CADVENTORY_`, using `__` between
//!    section and key (`CADVENTORY_INDEXER__WORKERS=8`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CADVENTORY_";
const MAX_WORKERS: usize = 64;
const MIN_THUMBNAIL_SIZE: u32 = 16;
const MAX_THUMBNAIL_SIZE: u32 = 2048;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "cadventory")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub indexer: IndexerConfig,
    pub scan: ScanConfig,
    pub kernel: KernelConfig,
    pub thumbnail: ThumbnailConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Directory thumbnails are written to.
    pub thumbnails: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        match project_dirs() {
            Some(dirs) => Self {
                database: dirs.data_dir().join("catalog.sqlite3"),
                thumbnails: dirs.cache_dir().join("thumbnails"),
            },
            None => Self {
                database: PathBuf::from(".cadventory/catalog.sqlite3"),
                thumbnails: PathBuf::from(".cadventory/thumbnails"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub workers: usize,
    /// Files buffered between the scanner and the workers.
    pub queue_capacity: usize,
    /// Seconds a single kernel invocation may take.
    pub extract_timeout: u64,
    /// Milliseconds between progress events.
    pub progress_interval: u64,
    /// Also emit a progress event after this many files.
    pub progress_every: u64,
}

impl IndexerConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            queue_capacity: 256,
            extract_timeout: 30,
            progress_interval: 250,
            progress_every: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    /// Extensions (without the dot, case-insensitive) that are never candidates.
    pub ignore_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_hidden: false,
            follow_symlinks: true,
            ignore_extensions: ["tmp", "bak", "swp", "part", "crdownload", "lock"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// External kernel executable. Discovered on `PATH` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// Arguments passed before the per-file arguments.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Edge length in pixels.
    pub size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self { size: 256 }
    }
}

impl Config {
    /// Where the configuration file is looked for when none is given.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// The layered sources, without extracting them.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        if let Some(file) = file {
            let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&file)),
                Some("json") => figment.merge(Json::file(&file)),
                _ => exn::bail!(ErrorKind::UnsupportedFileType(file)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_WORKERS).contains(&self.indexer.workers) {
            exn::bail!(ErrorKind::Invalid("indexer.workers must be between 1 and 64"));
        }
        if self.indexer.queue_capacity == 0 {
            exn::bail!(ErrorKind::Invalid("indexer.queue_capacity must be at least 1"));
        }
        if self.indexer.extract_timeout == 0 {
            exn::bail!(ErrorKind::Invalid("indexer.extract_timeout must be at least 1 second"));
        }
        if !(MIN_THUMBNAIL_SIZE..=MAX_THUMBNAIL_SIZE).contains(&self.thumbnail.size) {
            exn::bail!(ErrorKind::Invalid("thumbnail.size must be between 16 and 2048"));
        }
        Ok(())
    }
}

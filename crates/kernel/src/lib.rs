//! Geometry kernel boundary.
//!
//! A kernel turns a classified model file into [`GeometryMetadata`] and a
//! renderable [`Scene`]. Kernels are treated as untrusted: every call carries
//! a deadline, and every failure is reported as one of a small set of typed
//! [`ErrorKind`](error::ErrorKind)s instead of a panic or a hang.
//!
//! Implementations:
//! - [`ProcessKernel`] runs an external executable per file, so a crash or
//!   hang on adversarial input only ever takes down a child process.
//! - [`MeshKernel`] reads simple mesh formats (STL, OBJ, OFF) in-process on
//!   the blocking thread pool.
//! - [`KernelRouter`] prefers an external kernel when one is available and
//!   falls back to the mesh reader otherwise.

pub mod error;
mod mesh;
mod models;
mod process;
mod router;

pub use crate::mesh::MeshKernel;
pub use crate::models::{BoundingBox, Extraction, GeometryMetadata, Scene, Triangle, Units};
pub use crate::process::ProcessKernel;
pub use crate::router::KernelRouter;
pub use cadventory_format::Format;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type KernelHandle = Arc<dyn Kernel>;

/// A capability that parses model files.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Parse the model at `path`, which has already been classified as `format`.
    ///
    /// Implementations must return [`ErrorKind::Timeout`](error::ErrorKind::Timeout)
    /// rather than block past `timeout`.
    async fn parse(&self, path: &Path, format: Format, timeout: Duration) -> Result<Extraction>;
}

use crate::error::{ErrorKind, Result};
use crate::{Extraction, Format, Kernel, MeshKernel, ProcessKernel};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Chooses a kernel per file.
///
/// An external kernel (configured or discovered) handles everything when
/// present, since it runs isolated and understands more formats. Without one,
/// mesh formats are read in-process and every other format fails with
/// [`ErrorKind::KernelNotFound`].
#[derive(Debug, Clone, Default)]
pub struct KernelRouter {
    external: Option<ProcessKernel>,
    mesh: MeshKernel,
}

impl KernelRouter {
    pub fn new(external: Option<ProcessKernel>) -> Self {
        Self { external, mesh: MeshKernel }
    }

    /// Use the configured executable if given, otherwise whatever can be found
    /// on `PATH`, otherwise only the in-process mesh reader.
    pub fn from_program(program: Option<&Path>, args: Vec<String>) -> Self {
        let external = match program {
            Some(program) => Some(ProcessKernel::new(program, args)),
            None => ProcessKernel::discover().ok(),
        };
        Self::new(external)
    }

    pub fn external(&self) -> Option<&ProcessKernel> {
        self.external.as_ref()
    }
}

#[async_trait]
impl Kernel for KernelRouter {
    fn name(&self) -> &str {
        match &self.external {
            Some(kernel) => kernel.name(),
            None => self.mesh.name(),
        }
    }

    async fn parse(&self, path: &Path, format: Format, timeout: Duration) -> Result<Extraction> {
        match &self.external {
            Some(kernel) => kernel.parse(path, format, timeout).await,
            None if MeshKernel::supports(format) => self.mesh.parse(path, format, timeout).await,
            // Readable once an external kernel is installed.
            None => exn::bail!(ErrorKind::KernelNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_external_kernel_only_meshes_are_supported() {
        let router = KernelRouter::new(None);
        assert_eq!(router.name(), "mesh");
        let err = router.parse(Path::new("part.step"), Format::Step, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::KernelNotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_kernel_takes_precedence() {
        let router = KernelRouter::from_program(Some(Path::new("sh")), vec!["-c".to_string(), "exit 3".to_string()]);
        assert_eq!(router.name(), "external");
        let err = router.parse(Path::new("model.stl"), Format::Stl, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFeature(_)));
    }
}

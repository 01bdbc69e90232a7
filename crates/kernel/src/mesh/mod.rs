//! In-process readers for plain mesh formats.

mod obj;
mod off;
mod stl;

use crate::error::{ErrorKind, Result};
use crate::{BoundingBox, Extraction, Format, GeometryMetadata, Kernel, Scene, Triangle, Units};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

/// Reads STL, OBJ and OFF meshes without an external kernel.
///
/// Parsing runs on Tokio's blocking pool. A panic inside a reader surfaces as
/// [`ErrorKind::KernelCrash`]; a reader that overruns the deadline is reported
/// as [`ErrorKind::Timeout`] and left to finish in the background, since a
/// blocking thread cannot be interrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshKernel;

impl MeshKernel {
    /// Whether this kernel has a reader for `format`.
    #[must_use]
    pub fn supports(format: Format) -> bool {
        matches!(format, Format::Stl | Format::Obj | Format::Off)
    }

    /// Parse an in-memory mesh synchronously.
    pub fn read(bytes: &[u8], format: Format) -> Result<Extraction> {
        let mesh = match format {
            Format::Stl => stl::read(bytes)?,
            Format::Obj => obj::read(bytes)?,
            Format::Off => off::read(bytes)?,
            other => exn::bail!(ErrorKind::UnsupportedFeature(format!("no in-process reader for {other}"))),
        };
        Ok(mesh.finish())
    }
}

#[async_trait]
impl Kernel for MeshKernel {
    fn name(&self) -> &str {
        "mesh"
    }

    #[instrument(skip(self))]
    async fn parse(&self, path: &Path, format: Format, timeout: Duration) -> Result<Extraction> {
        if !Self::supports(format) {
            exn::bail!(ErrorKind::UnsupportedFeature(format!("no in-process reader for {format}")));
        }
        let path = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).or_raise(|| ErrorKind::Io)?;
            Self::read(&bytes, format)
        });
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => exn::bail!(ErrorKind::KernelCrash("mesh reader panicked".to_string())),
            Ok(Err(_)) => exn::bail!(ErrorKind::KernelCrash("mesh reader was cancelled".to_string())),
            Err(_elapsed) => exn::bail!(ErrorKind::Timeout(timeout)),
        }
    }
}

/// Accumulates geometry while a reader walks a file.
#[derive(Debug, Default)]
pub(crate) struct MeshBuilder {
    objects: u64,
    primitives: u64,
    vertices: u64,
    bounds: Option<BoundingBox>,
    title: Option<String>,
    warnings: Vec<String>,
    triangles: Vec<Triangle>,
}

impl MeshBuilder {
    pub(crate) fn object(&mut self, name: Option<&str>) {
        self.objects += 1;
        if self.title.is_none()
            && let Some(name) = name.map(str::trim).filter(|n| !n.is_empty())
        {
            self.title = Some(name.to_string());
        }
    }

    pub(crate) fn vertex(&mut self, point: [f32; 3]) {
        self.vertices += 1;
        let point = point.map(f64::from);
        match &mut self.bounds {
            Some(bounds) => bounds.include(point),
            None => self.bounds = Some(BoundingBox::at(point)),
        }
    }

    /// Record one primitive made of the given polygon corners, fan-triangulated.
    pub(crate) fn polygon(&mut self, corners: &[[f32; 3]]) {
        self.primitives += 1;
        if corners.len() < 3 {
            self.warn(format!("degenerate polygon with {} corners", corners.len()));
            return;
        }
        for pair in corners[1..].windows(2) {
            self.triangles.push([corners[0], pair[0], pair[1]]);
        }
    }

    pub(crate) fn warn(&mut self, warning: String) {
        // One warning per distinct problem is plenty for a catalog entry.
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub(crate) fn finish(mut self) -> Extraction {
        if self.objects == 0 && self.primitives > 0 {
            self.objects = 1;
        }
        Extraction {
            metadata: GeometryMetadata {
                objects: self.objects,
                primitives: self.primitives,
                vertices: self.vertices,
                bounds: self.bounds,
                units: Units::Unspecified,
                title: self.title,
                warnings: self.warnings,
            },
            scene: Scene { triangles: self.triangles },
        }
    }
}

/// Parse exactly three finite coordinates.
pub(crate) fn parse_point<'a>(mut fields: impl Iterator<Item = &'a str>, line: usize) -> Result<[f32; 3]> {
    let mut point = [0f32; 3];
    for axis in &mut point {
        let field = fields.next().ok_or_raise(|| ErrorKind::Malformed(format!("line {line}: missing coordinate")))?;
        *axis = field
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_raise(|| ErrorKind::Malformed(format!("line {line}: invalid coordinate `{field}`")))?;
    }
    Ok(point)
}

/// Decode text formats, rejecting anything that isn't UTF-8.
pub(crate) fn text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).or_raise(|| ErrorKind::Malformed("not valid UTF-8 text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TETRAHEDRON: &str = "\
OFF
4 4 6
0 0 0
1 0 0
0 1 0
0 0 1
3 0 1 2
3 0 1 3
3 0 2 3
3 1 2 3
";

    #[tokio::test]
    async fn test_parse_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TETRAHEDRON.as_bytes()).unwrap();
        let extraction = MeshKernel.parse(file.path(), Format::Off, Duration::from_secs(5)).await.unwrap();
        assert_eq!(extraction.metadata.primitives, 4);
        assert_eq!(extraction.scene.triangles.len(), 4);
    }

    #[tokio::test]
    async fn test_parse_rejects_formats_without_reader() {
        let err = MeshKernel.parse(Path::new("model.step"), Format::Step, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFeature(_)));
    }

    #[tokio::test]
    async fn test_parse_missing_file_is_io() {
        let err = MeshKernel.parse(Path::new("/no/such/model.stl"), Format::Stl, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Io);
    }

    #[test]
    fn test_polygon_fan_triangulation() {
        let mut mesh = MeshBuilder::default();
        mesh.polygon(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
        mesh.polygon(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let extraction = mesh.finish();
        assert_eq!(extraction.metadata.primitives, 2);
        assert_eq!(extraction.metadata.objects, 1);
        assert_eq!(extraction.scene.triangles.len(), 2);
        assert_eq!(extraction.metadata.warnings, vec!["degenerate polygon with 2 corners".to_string()]);
    }
}

use serde::{Deserialize, Serialize};

/// A single triangle, as three `[x, y, z]` corners.
pub type Triangle = [[f32; 3]; 3];

/// Axis-aligned bounding volume of a model, in model units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// A zero-volume box around a single point.
    #[must_use]
    pub fn at(point: [f64; 3]) -> Self {
        Self { min: point, max: point }
    }

    /// Grow the box to contain `point`.
    pub fn include(&mut self, point: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    /// Smallest box containing every point, or `None` if there are none.
    pub fn from_points(points: impl IntoIterator<Item = [f64; 3]>) -> Option<Self> {
        let mut points = points.into_iter();
        let mut bounds = Self::at(points.next()?);
        points.for_each(|point| bounds.include(point));
        Some(bounds)
    }

    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        [self.max[0] - self.min[0], self.max[1] - self.min[1], self.max[2] - self.min[2]]
    }

    #[must_use]
    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }

    /// Length of the box diagonal.
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        let [x, y, z] = self.extent();
        (x * x + y * y + z * z).sqrt()
    }
}

/// Unit system declared by the model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Millimeters,
    Centimeters,
    Meters,
    Inches,
    Feet,
    /// The format has no notion of units (STL, OBJ, ...) or the file didn't say.
    #[default]
    Unspecified,
}

/// Structural metadata extracted from a model file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometryMetadata {
    /// Top-level objects (solids, groups, regions).
    pub objects: u64,
    /// Primitives (facets, faces, solids) across all objects.
    pub primitives: u64,
    pub vertices: u64,
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    #[serde(default)]
    pub units: Units,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Non-fatal validation findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Renderable preview geometry handed from a kernel to the thumbnail renderer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub triangles: Vec<Triangle>,
}

impl Scene {
    /// Bounding box of every triangle corner in the scene.
    #[must_use]
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(
            self.triangles.iter().flatten().map(|p| [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])]),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Successful kernel output for one file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub metadata: GeometryMetadata,
    #[serde(default)]
    pub scene: Scene,
}

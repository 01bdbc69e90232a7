use crate::error::{ErrorKind, Result};
use cadventory_kernel::Scene;
use exn::OptionExt;
use image::{Rgba, RgbaImage};

const BACKGROUND: Rgba<u8> = Rgba([236, 238, 240, 255]);
const SURFACE: [f64; 3] = [168.0, 180.0, 198.0];
const AMBIENT: f64 = 0.3;
/// Fraction of the image the model's bounding sphere may span.
const FILL: f64 = 0.9;

type Vec3 = [f64; 3];

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

fn normalize(v: Vec3) -> Option<Vec3> {
    let length = dot(v, v).sqrt();
    (length > f64::EPSILON && length.is_finite()).then(|| [v[0] / length, v[1] / length, v[2] / length])
}

/// Fixed isometric-style camera looking at the model from the front-right,
/// slightly above, with +Z up (the CAD convention).
struct Camera {
    right: Vec3,
    up: Vec3,
    toward_viewer: Vec3,
    light: Vec3,
}

impl Camera {
    fn isometric() -> Self {
        let toward_viewer = [0.577_350_269_189_625_8, -0.577_350_269_189_625_8, 0.577_350_269_189_625_8];
        let right = [0.707_106_781_186_547_6, 0.707_106_781_186_547_6, 0.0];
        let up = cross(toward_viewer, right);
        // Key light over the viewer's left shoulder.
        let light = [
            toward_viewer[0] - 0.4 * right[0] + 0.5 * up[0],
            toward_viewer[1] - 0.4 * right[1] + 0.5 * up[1],
            toward_viewer[2] - 0.4 * right[2] + 0.5 * up[2],
        ];
        let light = normalize(light).unwrap_or(toward_viewer);
        Self { right, up, toward_viewer, light }
    }

    /// Project a model-space point (already centered) into `[x, y, depth]`,
    /// where a larger depth is closer to the viewer.
    fn project(&self, point: Vec3) -> Vec3 {
        [dot(point, self.right), dot(point, self.up), dot(point, self.toward_viewer)]
    }
}

/// Render `scene` into a `size`×`size` image.
///
/// Framing is derived from the scene's bounding box alone, so identical
/// geometry always produces an identical image.
pub fn render(scene: &Scene, size: u32) -> Result<RgbaImage> {
    if !(crate::MIN_SIZE..=crate::MAX_SIZE).contains(&size) {
        exn::bail!(ErrorKind::InvalidSize(size));
    }
    if scene.is_empty() {
        exn::bail!(ErrorKind::EmptyScene);
    }
    let bounds = scene.bounds().ok_or_raise(|| ErrorKind::EmptyScene)?;
    let radius = bounds.diagonal() / 2.0;
    if !(radius > f64::EPSILON && radius.is_finite()) {
        exn::bail!(ErrorKind::DegenerateGeometry);
    }
    let center = bounds.center();
    let half = f64::from(size) / 2.0;
    let scale = half * FILL / radius;
    let camera = Camera::isometric();

    let mut image = RgbaImage::from_pixel(size, size, BACKGROUND);
    let mut depth = vec![f64::NEG_INFINITY; (size as usize) * (size as usize)];
    let mut drawn = false;

    for triangle in &scene.triangles {
        let corners = triangle.map(|p| sub([f64::from(p[0]), f64::from(p[1]), f64::from(p[2])], center));
        let Some(normal) = normalize(cross(sub(corners[1], corners[0]), sub(corners[2], corners[0]))) else {
            continue;
        };
        // Winding in the wild is unreliable, so light both faces.
        let intensity = AMBIENT + (1.0 - AMBIENT) * dot(normal, camera.light).abs();
        let shade = Rgba([
            (SURFACE[0] * intensity).round().clamp(0.0, 255.0) as u8,
            (SURFACE[1] * intensity).round().clamp(0.0, 255.0) as u8,
            (SURFACE[2] * intensity).round().clamp(0.0, 255.0) as u8,
            255,
        ]);
        let screen = corners.map(|p| {
            let [x, y, z] = camera.project(p);
            [half + x * scale, half - y * scale, z]
        });
        drawn |= rasterize(&screen, shade, &mut image, &mut depth);
    }

    if !drawn {
        exn::bail!(ErrorKind::DegenerateGeometry);
    }
    Ok(image)
}

fn edge(a: Vec3, b: Vec3, x: f64, y: f64) -> f64 {
    (b[0] - a[0]) * (y - a[1]) - (b[1] - a[1]) * (x - a[0])
}

/// Fill one screen-space triangle, sampling pixel centres. Returns whether
/// any pixel was written.
fn rasterize(screen: &[Vec3; 3], shade: Rgba<u8>, image: &mut RgbaImage, depth: &mut [f64]) -> bool {
    let [a, b, c] = *screen;
    let area = edge(a, b, c[0], c[1]);
    if area.abs() <= f64::EPSILON {
        return false;
    }
    let (width, height) = (f64::from(image.width()), f64::from(image.height()));
    let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0);
    let max_x = a[0].max(b[0]).max(c[0]).ceil().min(width - 1.0);
    let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0);
    let max_y = a[1].max(b[1]).max(c[1]).ceil().min(height - 1.0);
    if min_x > max_x || min_y > max_y {
        return false;
    }
    let mut written = false;
    for py in (min_y as u32)..=(max_y as u32) {
        for px in (min_x as u32)..=(max_x as u32) {
            let (x, y) = (f64::from(px) + 0.5, f64::from(py) + 0.5);
            let (w0, w1, w2) = (edge(b, c, x, y) / area, edge(c, a, x, y) / area, edge(a, b, x, y) / area);
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = w0 * a[2] + w1 * b[2] + w2 * c[2];
            let index = py as usize * image.width() as usize + px as usize;
            if z > depth[index] {
                depth[index] = z;
                image.put_pixel(px, py, shade);
                written = true;
            }
        }
    }
    written
}

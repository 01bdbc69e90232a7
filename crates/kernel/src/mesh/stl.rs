use super::{MeshBuilder, parse_point, text};
use crate::error::{ErrorKind, Result};

const HEADER_LEN: usize = 80;
const FACET_LEN: usize = 50;

pub(super) fn read(bytes: &[u8]) -> Result<MeshBuilder> {
    if is_binary(bytes) { read_binary(bytes) } else { read_ascii(bytes) }
}

/// Binary STL headers may legitimately start with "solid", so the facet
/// count law decides, not the first five bytes.
fn is_binary(bytes: &[u8]) -> bool {
    facet_count(bytes)
        .and_then(|count| count.checked_mul(FACET_LEN))
        .and_then(|body| body.checked_add(HEADER_LEN + 4))
        .is_some_and(|expected| expected == bytes.len())
}

fn facet_count(bytes: &[u8]) -> Option<usize> {
    let raw = bytes.get(HEADER_LEN..HEADER_LEN + 4)?;
    usize::try_from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])).ok()
}

fn read_binary(bytes: &[u8]) -> Result<MeshBuilder> {
    let mut mesh = MeshBuilder::default();
    let title = String::from_utf8_lossy(&bytes[..HEADER_LEN]);
    let title = title.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    mesh.object((!title.starts_with("solid") && title.chars().all(|c| !c.is_control())).then_some(title));
    for facet in bytes[HEADER_LEN + 4..].chunks_exact(FACET_LEN) {
        // Skip the 12-byte normal; the renderer derives its own from winding.
        let mut corners = [[0f32; 3]; 3];
        for (corner, raw) in corners.iter_mut().zip(facet[12..48].chunks_exact(12)) {
            for (axis, value) in corner.iter_mut().zip(raw.chunks_exact(4)) {
                *axis = f32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            }
            if corner.iter().any(|v| !v.is_finite()) {
                exn::bail!(ErrorKind::Malformed("non-finite vertex coordinate".to_string()));
            }
            mesh.vertex(*corner);
        }
        mesh.polygon(&corners);
    }
    Ok(mesh)
}

fn read_ascii(bytes: &[u8]) -> Result<MeshBuilder> {
    let mut mesh = MeshBuilder::default();
    let mut corners: Vec<[f32; 3]> = Vec::with_capacity(3);
    let mut in_solid = false;
    for (index, line) in text(bytes)?.lines().enumerate() {
        let number = index + 1;
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("solid") => {
                let name = line.trim_start().strip_prefix("solid");
                mesh.object(name);
                in_solid = true;
            },
            Some("endsolid") => in_solid = false,
            Some("outer") => corners.clear(),
            Some("vertex") => {
                let point = parse_point(fields, number)?;
                mesh.vertex(point);
                corners.push(point);
            },
            Some("endloop") => {
                if corners.len() != 3 {
                    mesh.warn(format!("facet with {} vertices", corners.len()));
                }
                mesh.polygon(&corners);
                corners.clear();
            },
            Some("facet" | "endfacet") | None => {},
            Some(other) if !in_solid => {
                exn::bail!(ErrorKind::Malformed(format!("line {number}: unexpected `{other}` outside a solid")));
            },
            Some(other) => {
                exn::bail!(ErrorKind::Malformed(format!("line {number}: unknown keyword `{other}`")));
            },
        }
    }
    if in_solid {
        mesh.warn("missing `endsolid`".to_string());
    }
    Ok(mesh)
}

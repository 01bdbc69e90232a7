use super::{MeshBuilder, parse_point, text};
use crate::error::{ErrorKind, Result};
use exn::OptionExt;

pub(super) fn read(bytes: &[u8]) -> Result<MeshBuilder> {
    let mut mesh = MeshBuilder::default();
    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut corners: Vec<[f32; 3]> = Vec::new();
    for (index, line) in text(bytes)?.lines().enumerate() {
        let number = index + 1;
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                // An optional fourth (w) component is ignored.
                let point = parse_point(fields, number)?;
                mesh.vertex(point);
                vertices.push(point);
            },
            Some("f") => {
                corners.clear();
                for field in fields {
                    corners.push(vertices[resolve(field, vertices.len(), number)?]);
                }
                mesh.polygon(&corners);
            },
            Some("o") => mesh.object(line.trim_start().strip_prefix('o')),
            // Everything else (normals, texture coordinates, groups, materials,
            // smoothing, free-form curves) is irrelevant to the catalog.
            Some(_) | None => {},
        }
    }
    Ok(mesh)
}

/// Resolve a face corner reference (`v`, `v/vt`, `v//vn` or `v/vt/vn`) into a
/// zero-based vertex index. Negative references count back from the most
/// recently defined vertex.
fn resolve(field: &str, defined: usize, line: usize) -> Result<usize> {
    let raw = field.split('/').next().unwrap_or_default();
    let reference = raw
        .parse::<i64>()
        .ok()
        .ok_or_raise(|| ErrorKind::Malformed(format!("line {line}: invalid vertex reference `{field}`")))?;
    let defined_signed = i64::try_from(defined).unwrap_or(i64::MAX);
    let index = match reference {
        0 => None,
        r if r > 0 => Some(r - 1),
        r => Some(defined_signed + r),
    };
    index
        .filter(|i| (0..defined_signed).contains(i))
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_raise(|| ErrorKind::Malformed(format!("line {line}: vertex reference `{field}` out of range")))
}

use super::{MeshBuilder, parse_point, text};
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};

pub(super) fn read(bytes: &[u8]) -> Result<MeshBuilder> {
    // OFF is line-oriented but allows comments and blank lines anywhere.
    let mut lines = text(bytes)?
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.split('#').next().unwrap_or_default().trim()))
        .filter(|(_, line)| !line.is_empty());

    let (number, header) = lines.next().ok_or_raise(|| ErrorKind::Malformed("empty file".to_string()))?;
    let mut fields = header.split_whitespace();
    let keyword = fields.next().unwrap_or_default();
    if !keyword.ends_with("OFF") {
        exn::bail!(ErrorKind::Malformed(format!("line {number}: missing OFF keyword")));
    }
    let mut counts: Vec<&str> = fields.collect();
    let mut counts_line = number;
    if counts.is_empty() {
        let (number, line) = lines.next().ok_or_raise(|| ErrorKind::Malformed("missing element counts".to_string()))?;
        counts = line.split_whitespace().collect();
        counts_line = number;
    }
    let count = |position: usize| -> Result<usize> {
        counts
            .get(position)
            .ok_or_raise(|| ErrorKind::Malformed(format!("line {counts_line}: missing element count")))?
            .parse::<usize>()
            .or_raise(|| ErrorKind::Malformed(format!("line {counts_line}: invalid element count")))
    };
    let (vertex_count, face_count) = (count(0)?, count(1)?);

    let mut mesh = MeshBuilder::default();
    let mut vertices = Vec::with_capacity(vertex_count.min(1 << 20));
    for _ in 0..vertex_count {
        let (number, line) = lines.next().ok_or_raise(|| ErrorKind::Malformed("truncated vertex list".to_string()))?;
        // Colour and texture variants append extra columns after x, y, z.
        let point = parse_point(line.split_whitespace(), number)?;
        mesh.vertex(point);
        vertices.push(point);
    }
    let mut corners = Vec::new();
    for _ in 0..face_count {
        let (number, line) = lines.next().ok_or_raise(|| ErrorKind::Malformed("truncated face list".to_string()))?;
        let mut fields = line.split_whitespace();
        let arity = fields
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_raise(|| ErrorKind::Malformed(format!("line {number}: invalid face size")))?;
        corners.clear();
        for _ in 0..arity {
            let index = fields
                .next()
                .and_then(|i| i.parse::<usize>().ok())
                .filter(|i| *i < vertices.len())
                .ok_or_raise(|| ErrorKind::Malformed(format!("line {number}: invalid vertex index")))?;
            corners.push(vertices[index]);
        }
        mesh.polygon(&corners);
    }
    mesh.object(None);
    Ok(mesh)
}

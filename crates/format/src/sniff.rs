use crate::Format;
use crate::error::{ErrorKind, Result};

const BRLCAD_V5_MAGIC1: u8 = 0x76;
const BRLCAD_V5_MAGIC2: u8 = 0x35;
const BRLCAD_V4_IDENT: u8 = b'I';
const STL_ASCII_MAGIC: &[u8] = b"solid";
const STL_BINARY_HEADER: usize = 80;
const STL_BINARY_FACET: u64 = 50;
const PLY_MAGIC: &[u8] = b"ply";
const STEP_MAGIC: &[u8] = b"ISO-10303-21;";
const IGES_SECTION_COLUMN: usize = 72;
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const OBJ_DIRECTIVES: [&[u8]; 13] = [
    b"#", b"v", b"vn", b"vt", b"vp", b"f", b"o", b"g", b"s", b"l", b"p", b"mtllib", b"usemtl",
];

impl Format {
    /// Verify that `header` (the leading bytes of a file of `size` bytes)
    /// carries the signature expected for this format.
    ///
    /// This is a cheap plausibility check, not validation: a file passing it
    /// can still be rejected by a geometry kernel later on.
    pub fn check_header(&self, header: &[u8], size: u64) -> Result<()> {
        if header.is_empty() || size == 0 {
            exn::bail!(ErrorKind::Empty);
        }
        let verdict = match self {
            Format::BrlCad => check_brlcad(header),
            Format::Stl => check_stl(header, size),
            Format::Obj => check_obj(header),
            Format::Ply => check_ply(header),
            Format::Off => check_off(header),
            Format::Step => check_step(header),
            Format::Iges => check_iges(header),
            Format::ThreeMf => check_zip(header),
        };
        match verdict {
            Ok(()) => Ok(()),
            Err(reason) => exn::bail!(ErrorKind::HeaderMismatch(*self, reason)),
        }
    }
}

type Verdict = std::result::Result<(), &'static str>;

fn check_brlcad(header: &[u8]) -> Verdict {
    let v5 = header.len() >= 8 && header[0] == BRLCAD_V5_MAGIC1 && header[7] == BRLCAD_V5_MAGIC2;
    let v4 = header[0] == BRLCAD_V4_IDENT;
    if v5 || v4 { Ok(()) } else { Err("missing database magic bytes") }
}

fn check_stl(header: &[u8], size: u64) -> Verdict {
    // Plenty of binary exporters also start their 80-byte header with
    // "solid", so this alone doesn't prove the file is ASCII.
    if header.trim_ascii_start().starts_with(STL_ASCII_MAGIC) {
        return Ok(());
    }
    let Some(count) = header.get(STL_BINARY_HEADER..STL_BINARY_HEADER + 4) else {
        return Err("too short for a binary facet count");
    };
    let count = u64::from(u32::from_le_bytes([count[0], count[1], count[2], count[3]]));
    let expected = count.checked_mul(STL_BINARY_FACET).and_then(|body| body.checked_add(84));
    if expected == Some(size) { Ok(()) } else { Err("binary facet count disagrees with file size") }
}

fn check_obj(header: &[u8]) -> Verdict {
    if memchr::memchr(0, header).is_some() {
        return Err("binary data in a text format");
    }
    let first = header
        .split(|b| *b == b'\n')
        .map(<[u8]>::trim_ascii)
        .find(|line| !line.is_empty())
        .ok_or("no geometry statements")?;
    let keyword = first.split(u8::is_ascii_whitespace).next().unwrap_or_default();
    // Comments don't need a space after the hash.
    if keyword.starts_with(b"#") || OBJ_DIRECTIVES.contains(&keyword) {
        Ok(())
    } else {
        Err("first statement is not an OBJ directive")
    }
}

fn check_ply(header: &[u8]) -> Verdict {
    match header.strip_prefix(PLY_MAGIC) {
        Some(rest) if rest.starts_with(b"\n") || rest.starts_with(b"\r\n") => Ok(()),
        _ => Err("missing `ply` magic line"),
    }
}

fn check_off(header: &[u8]) -> Verdict {
    let keyword = header.trim_ascii_start().split(u8::is_ascii_whitespace).next().unwrap_or_default();
    // OFF, COFF, NOFF, STOFF, 4OFF, CNOFF, ...
    if keyword.ends_with(b"OFF") && keyword.len() <= 6 { Ok(()) } else { Err("missing OFF keyword") }
}

fn check_step(header: &[u8]) -> Verdict {
    let header = header.strip_prefix(&UTF8_BOM).unwrap_or(header);
    if header.trim_ascii_start().starts_with(STEP_MAGIC) { Ok(()) } else { Err("missing ISO-10303-21 marker") }
}

fn check_iges(header: &[u8]) -> Verdict {
    let line = header.split(|b| *b == b'\n' || *b == b'\r').next().unwrap_or_default();
    match line.get(IGES_SECTION_COLUMN) {
        Some(b'S') => Ok(()),
        _ => Err("first record is not in the start section"),
    }
}

fn check_zip(header: &[u8]) -> Verdict {
    if header.starts_with(&ZIP_MAGIC) { Ok(()) } else { Err("not a ZIP container") }
}

#[cfg(test)]
mod tests {
    use crate::Format;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn binary_stl(facets: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&facets.to_le_bytes());
        bytes.resize(84 + 50 * facets as usize, 0);
        bytes
    }

    fn iges_start_record() -> Vec<u8> {
        let mut line = vec![b' '; 72];
        line.extend_from_slice(b"S      1\n");
        line
    }

    #[rstest]
    #[case(Format::BrlCad, &[0x76, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x35])]
    #[case(Format::BrlCad, b"I v4 database")]
    #[case(Format::Stl, b"solid cube\nfacet normal 0 0 1\n")]
    #[case(Format::Stl, b"  \n solid\n")]
    #[case(Format::Obj, b"# Blender export\nv 0 0 0\n")]
    #[case(Format::Obj, b"\n\nmtllib scene.mtl\n")]
    #[case(Format::Obj, b"v 1.0 2.0 3.0\n")]
    #[case(Format::Ply, b"ply\nformat ascii 1.0\n")]
    #[case(Format::Ply, b"ply\r\nformat binary_little_endian 1.0\r\n")]
    #[case(Format::Off, b"OFF\n8 6 12\n")]
    #[case(Format::Off, b"COFF 3 1 0\n")]
    #[case(Format::Step, b"ISO-10303-21;\nHEADER;\n")]
    #[case(Format::Step, b"\xEF\xBB\xBF\r\nISO-10303-21;\n")]
    #[case(Format::ThreeMf, &[0x50, 0x4B, 0x03, 0x04, 0x14])]
    fn test_check_header_accepts(#[case] format: Format, #[case] header: &[u8]) {
        let size = header.len() as u64;
        assert!(format.check_header(header, size).is_ok(), "{format} should accept {header:?}");
    }

    #[rstest]
    #[case(Format::BrlCad, b"\x00\x00\x00\x00\x00\x00\x00\x00")]
    #[case(Format::Stl, b"\x00\x01\x02garbage")]
    #[case(Format::Obj, b"v 0 0\x00 0\n")]
    #[case(Format::Obj, b"<html><body>")]
    #[case(Format::Ply, b"plyfoo\n")]
    #[case(Format::Off, b"NOT AN OFF FILE")]
    #[case(Format::Step, b"ISO-10303-28 xml")]
    #[case(Format::Iges, b"short line\n")]
    #[case(Format::ThreeMf, b"solid")]
    fn test_check_header_rejects(#[case] format: Format, #[case] header: &[u8]) {
        let err = format.check_header(header, header.len() as u64).unwrap_err();
        assert!(matches!(&*err, ErrorKind::HeaderMismatch(f, _) if *f == format));
    }

    #[test]
    fn test_binary_stl_facet_count_must_match_size() {
        let bytes = binary_stl(3);
        assert!(Format::Stl.check_header(&bytes[..84], bytes.len() as u64).is_ok());
        assert!(Format::Stl.check_header(&bytes[..84], bytes.len() as u64 + 1).is_err());
    }

    #[test]
    fn test_iges_start_section_column() {
        let line = iges_start_record();
        assert!(Format::Iges.check_header(&line, line.len() as u64).is_ok());
    }

    #[test]
    fn test_empty_header_is_rejected_for_every_format() {
        for format in Format::ALL {
            let err = format.check_header(b"", 0).unwrap_err();
            assert_eq!(*err, ErrorKind::Empty);
        }
    }
}

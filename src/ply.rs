//! PLY point-cloud header inspection.
//!
//! Only the header is parsed: enough to confirm the converter produced a readable
//! point cloud with positioned vertices before declaring the run a success. Rendering
//! is the viewer's business.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const MAX_HEADER_LINES: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlyElement {
    pub name: String,
    pub count: u64,
    pub properties: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub elements: Vec<PlyElement>,
    pub vertex_count: u64,
}

pub fn read_header(path: &Path) -> Result<PlyHeader> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    parse_header(BufReader::new(file))
}

pub fn parse_header<R: BufRead>(mut reader: R) -> Result<PlyHeader> {
    let mut line = Vec::new();
    let mut next_line = |reader: &mut R| -> Result<Option<String>> {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        let text = std::str::from_utf8(&line).context("header is not valid text")?;
        Ok(Some(text.trim().to_string()))
    };

    match next_line(&mut reader)? {
        Some(magic) if magic == "ply" => {}
        _ => bail!("missing 'ply' magic"),
    }

    let mut format = None;
    let mut elements: Vec<PlyElement> = Vec::new();
    let mut terminated = false;

    for _ in 0..MAX_HEADER_LINES {
        let Some(text) = next_line(&mut reader)? else {
            break;
        };
        let mut words = text.split_whitespace();
        match words.next() {
            Some("format") => {
                format = Some(match words.next() {
                    Some("ascii") => PlyFormat::Ascii,
                    Some("binary_little_endian") => PlyFormat::BinaryLittleEndian,
                    Some("binary_big_endian") => PlyFormat::BinaryBigEndian,
                    other => bail!("unsupported format {:?}", other),
                });
            }
            Some("element") => {
                let name = words.next().ok_or_else(|| anyhow!("element without name"))?;
                let count = words
                    .next()
                    .and_then(|c| c.parse::<u64>().ok())
                    .ok_or_else(|| anyhow!("element {name} has no valid count"))?;
                elements.push(PlyElement {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| anyhow!("property before any element"))?;
                let name = words
                    .last()
                    .ok_or_else(|| anyhow!("property without name"))?;
                element.properties.push(name.to_string());
            }
            Some("comment") | Some("obj_info") | None => {}
            Some("end_header") => {
                terminated = true;
                break;
            }
            Some(other) => bail!("unexpected header keyword {other:?}"),
        }
    }

    if !terminated {
        bail!("header has no end_header line");
    }
    let format = format.ok_or_else(|| anyhow!("header has no format line"))?;
    let vertex = elements
        .iter()
        .find(|e| e.name == "vertex")
        .ok_or_else(|| anyhow!("no vertex element"))?;
    for axis in ["x", "y", "z"] {
        if !vertex.properties.iter().any(|p| p == axis) {
            bail!("vertex element has no {axis} property");
        }
    }
    let vertex_count = vertex.count;

    Ok(PlyHeader {
        format,
        elements,
        vertex_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLMAP_HEADER: &str = "ply\n\
format binary_little_endian 1.0\n\
element vertex 2318\n\
property float x\n\
property float y\n\
property float z\n\
property float nx\n\
property float ny\n\
property float nz\n\
property uchar red\n\
property uchar green\n\
property uchar blue\n\
end_header\n";

    #[test]
    fn parses_colmap_point_cloud_header() -> Result<()> {
        let mut bytes = COLMAP_HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0x00, 0x13, 0x80]);
        let header = parse_header(bytes.as_slice())?;
        assert_eq!(header.format, PlyFormat::BinaryLittleEndian);
        assert_eq!(header.vertex_count, 2318);
        assert_eq!(header.elements[0].properties.len(), 9);
        Ok(())
    }

    #[test]
    fn rejects_non_ply_files() {
        assert!(parse_header("solid cube\n".as_bytes()).is_err());
        assert!(parse_header("".as_bytes()).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        let truncated = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\n";
        let err = parse_header(truncated.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("end_header"));
    }

    #[test]
    fn requires_positions() {
        let header = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n0 0\n";
        let err = parse_header(header.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("z property"));
    }

    #[test]
    fn ignores_comments_and_other_elements() -> Result<()> {
        let header = "ply\nformat ascii 1.0\ncomment made by hand\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nelement face 0\nproperty list uchar int vertex_indices\nend_header\n1 2 3\n";
        let parsed = parse_header(header.as_bytes())?;
        assert_eq!(parsed.vertex_count, 1);
        assert_eq!(parsed.elements[1].properties, vec!["vertex_indices"]);
        Ok(())
    }
}

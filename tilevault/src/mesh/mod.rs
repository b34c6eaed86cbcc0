//! Tile meshes.
//!
//! A tile's surface is one or more submeshes: vertices in the physical SRS,
//! face-indexed triangles, internal texture coordinates and optionally
//! external texture coordinates bound to a texture layer. Each mesh carries
//! a coverage mask recording which pixels of the tile footprint the
//! triangles cover.

mod coverage;

pub use coverage::{rasterize_triangle, GridMapping};

use crate::binio::{self, read_f64, read_u16, read_u32, read_u8, take, write_varint};
use crate::error::{Error, Result};
use crate::qtree::RasterMask;
use crate::tileid::Extents2;

/// Edge length of the coverage raster.
pub const COVERAGE_SIZE: u32 = 256;

const MAGIC: &[u8; 2] = b"ME";
const VERSION: u16 = 1;

/// One textured triangle patch of a tile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubMesh {
    /// Vertices in the physical SRS
    pub vertices: Vec<[f64; 3]>,
    /// Internal texture coordinates
    pub tc: Vec<[f64; 2]>,
    /// External texture coordinates, one per vertex; empty when unused
    pub etc: Vec<[f64; 2]>,
    /// Triangles as vertex indices
    pub faces: Vec<[u32; 3]>,
    /// Triangles as texture-coordinate indices, parallel to `faces`
    pub faces_tc: Vec<[u32; 3]>,
    /// Bound texture layer for the external coordinates
    pub texture_layer: Option<u16>,
}

impl SubMesh {
    /// Vertex z range over the submesh, `None` when there are no vertices.
    pub fn height_range(&self) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for v in &self.vertices {
            let (min, max) = range.unwrap_or((v[2], v[2]));
            range = Some((min.min(v[2]), max.max(v[2])));
        }
        range
    }
}

/// Mesh payload of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub submeshes: Vec<SubMesh>,
    /// Which coverage pixels the triangles cover
    pub coverage: RasterMask,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            submeshes: Vec::new(),
            coverage: RasterMask::empty(COVERAGE_SIZE),
        }
    }

    /// Total vertex count across submeshes.
    pub fn vertex_count(&self) -> usize {
        self.submeshes.iter().map(|sm| sm.vertices.len()).sum()
    }

    /// Total triangle count across submeshes.
    pub fn face_count(&self) -> usize {
        self.submeshes.iter().map(|sm| sm.faces.len()).sum()
    }

    /// Vertex z range over all submeshes.
    pub fn height_range(&self) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for sm in &self.submeshes {
            if let Some((lo, hi)) = sm.height_range() {
                let (min, max) = range.unwrap_or((lo, hi));
                range = Some((min.min(lo), max.max(hi)));
            }
        }
        range
    }

    /// 3D extents (x, y, z min/max) over all vertices.
    pub fn extents3(&self) -> Option<[f64; 6]> {
        let mut out: Option<[f64; 6]> = None;
        for sm in &self.submeshes {
            for v in &sm.vertices {
                let e = out.get_or_insert([v[0], v[1], v[2], v[0], v[1], v[2]]);
                for i in 0..3 {
                    e[i] = e[i].min(v[i]);
                    e[3 + i] = e[3 + i].max(v[i]);
                }
            }
        }
        out
    }

    /// Recompute the coverage mask by rasterising every triangle of every
    /// submesh into the coverage grid mapped over `extents`.
    pub fn rasterize_coverage(&mut self, extents: &Extents2) {
        let mapping = GridMapping::new(extents, COVERAGE_SIZE, COVERAGE_SIZE);
        let mut mask = RasterMask::empty(COVERAGE_SIZE);
        for sm in &self.submeshes {
            for face in &sm.faces {
                let tri = [
                    sm.vertices[face[0] as usize],
                    sm.vertices[face[1] as usize],
                    sm.vertices[face[2] as usize],
                ];
                rasterize_triangle(&tri, &mapping, &mut |x, y, _z| {
                    mask.set(x, y, true);
                });
            }
        }
        self.coverage = mask;
    }

    /// Validate index integrity: every face references existing vertices
    /// and `faces_tc` parallels `faces`.
    pub fn validate(&self) -> Result<()> {
        for (i, sm) in self.submeshes.iter().enumerate() {
            let nv = sm.vertices.len() as u32;
            let ntc = sm.tc.len() as u32;
            if sm.faces.iter().flatten().any(|&v| v >= nv) {
                return Err(Error::InconsistentInput(format!(
                    "submesh {}: face vertex index out of range",
                    i
                )));
            }
            if !sm.faces_tc.is_empty() {
                if sm.faces_tc.len() != sm.faces.len() {
                    return Err(Error::InconsistentInput(format!(
                        "submesh {}: faces_tc does not parallel faces",
                        i
                    )));
                }
                if sm.faces_tc.iter().flatten().any(|&t| t >= ntc) {
                    return Err(Error::InconsistentInput(format!(
                        "submesh {}: texture index out of range",
                        i
                    )));
                }
            }
            if !sm.etc.is_empty() && sm.etc.len() != sm.vertices.len() {
                return Err(Error::InconsistentInput(format!(
                    "submesh {}: external coordinates do not parallel vertices",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        write_varint(&mut out, self.submeshes.len() as u64);

        for sm in &self.submeshes {
            let mut sm_flags = 0u8;
            if !sm.etc.is_empty() {
                sm_flags |= 0x01;
            }
            if sm.texture_layer.is_some() {
                sm_flags |= 0x02;
            }
            out.push(sm_flags);
            if let Some(layer) = sm.texture_layer {
                out.extend_from_slice(&layer.to_le_bytes());
            }

            write_varint(&mut out, sm.vertices.len() as u64);
            for v in &sm.vertices {
                for c in v {
                    out.extend_from_slice(&c.to_bits().to_le_bytes());
                }
            }
            write_varint(&mut out, sm.tc.len() as u64);
            for t in &sm.tc {
                for c in t {
                    out.extend_from_slice(&c.to_bits().to_le_bytes());
                }
            }
            if !sm.etc.is_empty() {
                for t in &sm.etc {
                    for c in t {
                        out.extend_from_slice(&c.to_bits().to_le_bytes());
                    }
                }
            }
            write_varint(&mut out, sm.faces.len() as u64);
            for f in &sm.faces {
                for ix in f {
                    write_varint(&mut out, u64::from(*ix));
                }
            }
            // texture faces parallel geometry faces; an empty table is legal
            write_varint(&mut out, sm.faces_tc.len() as u64);
            for f in &sm.faces_tc {
                for ix in f {
                    write_varint(&mut out, u64::from(*ix));
                }
            }
        }

        let mask = self.coverage.serialize();
        out.extend_from_slice(&(mask.len() as u32).to_le_bytes());
        out.extend_from_slice(&mask);
        out
    }

    pub fn deserialize(blob: &[u8], name: &str) -> Result<Mesh> {
        let fail = |detail: String| Error::Format {
            path: name.to_string(),
            detail,
        };
        let io_fail = |e: std::io::Error| Error::Format {
            path: name.to_string(),
            detail: e.to_string(),
        };

        let mut cursor = blob;
        if take(&mut cursor, 2).map_err(io_fail)? != MAGIC {
            return Err(fail("bad magic".to_string()));
        }
        if read_u16(&mut cursor).map_err(io_fail)? != VERSION {
            return Err(fail("unsupported version".to_string()));
        }

        let count = binio::read_varint(&mut cursor).map_err(io_fail)? as usize;
        let mut submeshes = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let sm_flags = read_u8(&mut cursor).map_err(io_fail)?;
            let texture_layer = if sm_flags & 0x02 != 0 {
                Some(read_u16(&mut cursor).map_err(io_fail)?)
            } else {
                None
            };

            let nv = binio::read_varint(&mut cursor).map_err(io_fail)? as usize;
            let mut vertices = Vec::with_capacity(nv.min(1 << 20));
            for _ in 0..nv {
                vertices.push([
                    read_f64(&mut cursor).map_err(io_fail)?,
                    read_f64(&mut cursor).map_err(io_fail)?,
                    read_f64(&mut cursor).map_err(io_fail)?,
                ]);
            }

            let ntc = binio::read_varint(&mut cursor).map_err(io_fail)? as usize;
            let mut tc = Vec::with_capacity(ntc.min(1 << 20));
            for _ in 0..ntc {
                tc.push([
                    read_f64(&mut cursor).map_err(io_fail)?,
                    read_f64(&mut cursor).map_err(io_fail)?,
                ]);
            }

            let mut etc = Vec::new();
            if sm_flags & 0x01 != 0 {
                etc.reserve(nv.min(1 << 20));
                for _ in 0..nv {
                    etc.push([
                        read_f64(&mut cursor).map_err(io_fail)?,
                        read_f64(&mut cursor).map_err(io_fail)?,
                    ]);
                }
            }

            let nf = binio::read_varint(&mut cursor).map_err(io_fail)? as usize;
            let mut faces = Vec::with_capacity(nf.min(1 << 20));
            for _ in 0..nf {
                let mut f = [0u32; 3];
                for ix in &mut f {
                    *ix = binio::read_varint(&mut cursor).map_err(io_fail)? as u32;
                }
                faces.push(f);
            }

            let nft = binio::read_varint(&mut cursor).map_err(io_fail)? as usize;
            let mut faces_tc = Vec::with_capacity(nft.min(1 << 20));
            for _ in 0..nft {
                let mut f = [0u32; 3];
                for ix in &mut f {
                    *ix = binio::read_varint(&mut cursor).map_err(io_fail)? as u32;
                }
                faces_tc.push(f);
            }

            submeshes.push(SubMesh {
                vertices,
                tc,
                etc,
                faces,
                faces_tc,
                texture_layer,
            });
        }

        let mask_len = read_u32(&mut cursor).map_err(io_fail)? as usize;
        let mask_blob = take(&mut cursor, mask_len).map_err(io_fail)?;
        let coverage = RasterMask::deserialize(mask_blob).map_err(io_fail)?;

        let mesh = Mesh {
            submeshes,
            coverage,
        };
        mesh.validate()
            .map_err(|e| fail(e.to_string()))?;
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles covering the whole unit square at height 5.
    fn full_square_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.submeshes.push(SubMesh {
            vertices: vec![
                [0.0, 0.0, 5.0],
                [1.0, 0.0, 5.0],
                [1.0, 1.0, 5.0],
                [0.0, 1.0, 5.0],
            ],
            tc: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            etc: Vec::new(),
            faces: vec![[0, 1, 2], [0, 2, 3]],
            faces_tc: vec![[0, 1, 2], [0, 2, 3]],
            texture_layer: None,
        });
        mesh.rasterize_coverage(&Extents2::unit());
        mesh
    }

    #[test]
    fn test_full_square_covers_everything() {
        let mesh = full_square_mesh();
        assert!(mesh.coverage.is_full());
    }

    #[test]
    fn test_half_square_covers_half() {
        let mut mesh = Mesh::new();
        mesh.submeshes.push(SubMesh {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            faces: vec![[0, 1, 2]],
            ..Default::default()
        });
        mesh.rasterize_coverage(&Extents2::unit());
        let covered = mesh.coverage.count();
        let total = u64::from(COVERAGE_SIZE) * u64::from(COVERAGE_SIZE);
        // one diagonal half, up to the pixels along the hypotenuse
        assert!(covered > total * 45 / 100, "covered {}", covered);
        assert!(covered < total * 55 / 100, "covered {}", covered);
    }

    #[test]
    fn test_height_range_and_extents() {
        let mut mesh = full_square_mesh();
        mesh.submeshes[0].vertices[2][2] = 9.0;
        assert_eq!(mesh.height_range(), Some((5.0, 9.0)));
        let e = mesh.extents3().unwrap();
        assert_eq!(&e[..3], &[0.0, 0.0, 5.0]);
        assert_eq!(&e[3..], &[1.0, 1.0, 9.0]);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut mesh = full_square_mesh();
        mesh.submeshes[0].texture_layer = Some(7);
        mesh.submeshes[0].etc = mesh.submeshes[0].tc.clone();
        let blob = mesh.serialize();
        let back = Mesh::deserialize(&blob, "test").unwrap();
        assert_eq!(back, mesh);
    }

    #[test]
    fn test_deserialize_rejects_dangling_face() {
        let mut mesh = full_square_mesh();
        mesh.submeshes[0].faces[0] = [0, 1, 99];
        let blob = mesh.serialize();
        assert!(matches!(
            Mesh::deserialize(&blob, "test"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_validate_etc_parallel() {
        let mut mesh = full_square_mesh();
        mesh.submeshes[0].etc = vec![[0.0, 0.0]];
        assert!(mesh.validate().is_err());
    }
}

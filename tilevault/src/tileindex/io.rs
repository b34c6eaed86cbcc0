//! Tile index binary format.
//!
//! ```text
//! [magic "TI" | version u16 | minLod u8 | maxLod u8 | reserved u16]
//! ( per LOD: [size u32 | quadtree blob] ) x (maxLod - minLod + 1)
//! ```
//!
//! An index with no allocated LODs encodes minLod = 1, maxLod = 0.

use crate::binio::{read_u16, read_u32, read_u8, take};
use crate::error::{Error, Result};
use crate::qtree::QTree;
use crate::tileid::{Lod, LodRange};

use super::TileIndex;

const MAGIC: &[u8; 2] = b"TI";
const VERSION: u16 = 1;

impl TileIndex {
    /// Serialize the whole stack.
    pub fn serialize(&self) -> Vec<u8> {
        let (min, max) = match self.allocated_range() {
            LodRange::Range { min, max } => (min, max),
            LodRange::Empty => (1, 0),
        };

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.push(min);
        out.push(max);
        out.extend_from_slice(&0u16.to_le_bytes());

        for lod in min..=max {
            let blob = self
                .tree(lod)
                .map(QTree::serialize)
                .unwrap_or_else(|| QTree::new(lod, 0).serialize());
            out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            out.extend_from_slice(&blob);
        }
        out
    }

    /// Parse [`TileIndex::serialize`] output.
    ///
    /// `name` labels the source in format errors.
    pub fn deserialize(blob: &[u8], name: &str) -> Result<TileIndex> {
        let fail = |detail: &str| Error::format(name, detail);

        let mut cursor = blob;
        if take(&mut cursor, 2).map_err(|_| fail("truncated header"))? != MAGIC {
            return Err(fail("bad magic"));
        }
        let version = read_u16(&mut cursor).map_err(|_| fail("truncated header"))?;
        if version != VERSION {
            return Err(fail("unsupported version"));
        }
        let min = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
        let max = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
        read_u16(&mut cursor).map_err(|_| fail("truncated header"))?;

        let mut index = TileIndex::new();
        if min > max {
            return Ok(index);
        }
        for lod in min..=max {
            let size = read_u32(&mut cursor).map_err(|_| fail("truncated blob size"))? as usize;
            let blob = take(&mut cursor, size).map_err(|_| fail("truncated quadtree blob"))?;
            let tree = QTree::deserialize(lod as Lod, blob)
                .map_err(|e| fail(&format!("lod {} quadtree: {}", lod, e)))?;
            *index.tree_mut(lod) = tree;
        }
        Ok(index)
    }
}

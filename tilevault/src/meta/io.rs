//! Metatile binary format.
//!
//! ```text
//! [magic "MT" | version u16 | binaryOrder u8 | lod u8 | x u32 | y u32 | flagsMask u32]
//! per node, row-major:
//!   flags u8                      (0 = absent, nothing follows)
//!   heightRange f32 f32
//!   extents 6 x f32
//!   texelSize f32
//!   displaySize u16
//!   reference u16
//!   credits: varint count, varint ids
//! ```

use std::collections::BTreeSet;

use crate::binio::{self, read_f32, read_u16, read_u32, read_u8, take, write_varint};
use crate::error::{Error, Result};
use crate::tileid::TileId;

use super::{MetaNode, MetaTile};

const MAGIC: &[u8; 2] = b"MT";
const VERSION: u16 = 1;

impl MetaTile {
    pub fn serialize(&self) -> Vec<u8> {
        let flags_mask = self
            .nodes
            .iter()
            .flatten()
            .fold(0u32, |acc, n| acc | u32::from(n.flags));

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.push(self.binary_order);
        out.push(self.id.lod);
        out.extend_from_slice(&self.id.x.to_le_bytes());
        out.extend_from_slice(&self.id.y.to_le_bytes());
        out.extend_from_slice(&flags_mask.to_le_bytes());

        for node in &self.nodes {
            let Some(node) = node else {
                out.push(0);
                continue;
            };
            out.push(node.flags);
            if node.flags == 0 {
                continue;
            }
            out.extend_from_slice(&node.height_min.to_bits().to_le_bytes());
            out.extend_from_slice(&node.height_max.to_bits().to_le_bytes());
            for c in &node.extents {
                out.extend_from_slice(&c.to_bits().to_le_bytes());
            }
            out.extend_from_slice(&node.texel_size.to_bits().to_le_bytes());
            out.extend_from_slice(&node.display_size.to_le_bytes());
            out.extend_from_slice(&node.reference.to_le_bytes());
            write_varint(&mut out, node.credits.len() as u64);
            for credit in &node.credits {
                write_varint(&mut out, u64::from(*credit));
            }
        }
        out
    }

    pub fn deserialize(blob: &[u8], name: &str) -> Result<MetaTile> {
        let fail = |detail: &str| Error::format(name, detail);

        let mut cursor = blob;
        if take(&mut cursor, 2).map_err(|_| fail("truncated header"))? != MAGIC {
            return Err(fail("bad magic"));
        }
        if read_u16(&mut cursor).map_err(|_| fail("truncated header"))? != VERSION {
            return Err(fail("unsupported version"));
        }
        let binary_order = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
        if binary_order > 8 {
            return Err(fail("binary order out of range"));
        }
        let lod = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
        let x = read_u32(&mut cursor).map_err(|_| fail("truncated header"))?;
        let y = read_u32(&mut cursor).map_err(|_| fail("truncated header"))?;
        read_u32(&mut cursor).map_err(|_| fail("truncated header"))?;

        let id = TileId::new(lod, x, y);
        let mut tile = MetaTile::new(id, binary_order);
        if tile.id() != id {
            return Err(fail("metatile id not aligned to its binary order"));
        }

        let edge = 1usize << binary_order;
        for slot in 0..edge * edge {
            let flags = read_u8(&mut cursor).map_err(|_| fail("truncated node"))?;
            if flags == 0 {
                continue;
            }
            let height_min = read_f32(&mut cursor).map_err(|_| fail("truncated node"))?;
            let height_max = read_f32(&mut cursor).map_err(|_| fail("truncated node"))?;
            let mut extents = [0.0f32; 6];
            for c in &mut extents {
                *c = read_f32(&mut cursor).map_err(|_| fail("truncated node"))?;
            }
            let texel_size = read_f32(&mut cursor).map_err(|_| fail("truncated node"))?;
            let display_size = read_u16(&mut cursor).map_err(|_| fail("truncated node"))?;
            let reference = read_u16(&mut cursor).map_err(|_| fail("truncated node"))?;
            let count = binio::read_varint(&mut cursor).map_err(|_| fail("truncated credits"))?;
            let mut credits = BTreeSet::new();
            for _ in 0..count {
                let id = binio::read_varint(&mut cursor).map_err(|_| fail("truncated credits"))?;
                credits.insert(
                    u16::try_from(id).map_err(|_| fail("credit id out of range"))?,
                );
            }
            tile.nodes[slot] = Some(MetaNode {
                flags,
                extents,
                texel_size,
                display_size,
                reference,
                height_min,
                height_max,
                credits,
            });
        }
        Ok(tile)
    }
}

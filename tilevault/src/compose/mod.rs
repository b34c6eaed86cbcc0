//! Multi-set composition: paste and glue.
//!
//! Paste bulk-copies non-overlapping sets into a destination with last-wins
//! semantics and no re-encoding. Glue merges overlapping sets under a
//! priority order: the higher-priority surface wins, lower priorities leak
//! through only where the winner's coverage mask is clear.

mod glue;


pub use glue::{create_glue, GlueOptions, GlueOutcome};

use crate::error::Result;
use crate::tileid::LodRange;
use crate::tileindex::flags;
use crate::tileset::TileSet;

/// Copy every content tile of `src` into `dst`, raw bytes, last write wins.
pub(crate) fn paste_into(
    dst: &mut TileSet,
    src: &TileSet,
    lod_range: Option<LodRange>,
) -> Result<()> {
    let src_range = src.lod_range();
    let range = match lod_range {
        Some(r) => r.intersect(&src_range),
        None => src_range,
    };

    for lod in range.iter() {
        let mut ids = Vec::new();
        src.tile_index().traverse(lod, |id, value| {
            if value & (flags::CONTENT | flags::REFERENCE) != 0 {
                ids.push(id);
            }
        });
        for id in ids {
            let source = src.get_tile_source(id)?;
            dst.set_tile_source(id, &source)?;
        }
    }
    Ok(())
}

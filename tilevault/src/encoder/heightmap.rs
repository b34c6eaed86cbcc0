//! Height-map accumulation for navtile generation.
//!
//! Generators rasterise their meshes into per-tile f32 grids at a source
//! LOD; after traversal the accumulated map is stepped down the pyramid,
//! emitting a navtile wherever a tile has samples. Invalid samples carry
//! +∞ and the minimum height wins wherever rasterisation overlaps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::mesh::{rasterize_triangle, GridMapping, Mesh};
use crate::navtile::{NavTile, INVALID_HEIGHT, NAVTILE_SIZE};
use crate::refframe::{NodeInfo, ReferenceFrame};
use crate::tileid::{Extents2, Lod, TileId};

/// Thread-shared sparse map of tile-sized height grids.
///
/// Tile allocation happens under the map lock; rasterisation happens under
/// the per-tile lock only, so workers filling distinct tiles do not
/// serialise each other.
pub struct HeightMapAccumulator {
    lod: Lod,
    tile_size: u32,
    tiles: Mutex<HashMap<TileId, Arc<Mutex<Vec<f32>>>>>,
}

impl HeightMapAccumulator {
    /// Accumulator for source tiles at `lod`.
    pub fn new(lod: Lod) -> Self {
        Self {
            lod,
            tile_size: NAVTILE_SIZE,
            tiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn lod(&self) -> Lod {
        self.lod
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Grid for a tile, allocated lazily.
    pub fn tile(&self, id: TileId) -> Arc<Mutex<Vec<f32>>> {
        let mut tiles = self.tiles.lock().expect("accumulator lock poisoned");
        tiles
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(vec![
                    INVALID_HEIGHT;
                    (self.tile_size * self.tile_size) as usize
                ]))
            })
            .clone()
    }

    /// Rasterise a mesh's triangles into the tile's grid, minimum-wins.
    pub fn accumulate_mesh(&self, id: TileId, mesh: &Mesh, extents: &Extents2) {
        let grid = self.tile(id);
        let mapping = GridMapping::new(extents, self.tile_size, self.tile_size);
        let mut grid = grid.lock().expect("height grid lock poisoned");
        let size = self.tile_size;
        for sm in &mesh.submeshes {
            for face in &sm.faces {
                let tri = [
                    sm.vertices[face[0] as usize],
                    sm.vertices[face[1] as usize],
                    sm.vertices[face[2] as usize],
                ];
                rasterize_triangle(&tri, &mapping, &mut |x, y, z| {
                    let cell = &mut grid[(y * size + x) as usize];
                    if (z as f32) < *cell {
                        *cell = z as f32;
                    }
                });
            }
        }
    }

    /// Number of tiles holding samples.
    pub fn len(&self) -> usize {
        self.tiles.lock().expect("accumulator lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best default viewing position derived from the accumulated heights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestPosition {
    /// Position in the subtree SRS: x, y, height
    pub location: [f64; 3],
    /// Vertical span to frame the surface
    pub vertical_extent: f64,
}

/// Single-owner height pyramid built from an accumulator after traversal.
pub struct HeightMap {
    lod: Lod,
    tile_size: u32,
    tiles: HashMap<TileId, Vec<f32>>,
}

impl HeightMap {
    /// Take over the accumulator's grids.
    pub fn from_accumulator(acc: HeightMapAccumulator) -> Self {
        let tiles = acc
            .tiles
            .into_inner()
            .expect("accumulator lock poisoned")
            .into_iter()
            .map(|(id, grid)| {
                let grid = Arc::try_unwrap(grid)
                    .map(|m| m.into_inner().expect("height grid lock poisoned"))
                    .unwrap_or_else(|arc| arc.lock().expect("height grid lock poisoned").clone());
                (id, grid)
            })
            .collect();
        Self {
            lod: acc.lod,
            tile_size: acc.tile_size,
            tiles,
        }
    }

    pub fn lod(&self) -> Lod {
        self.lod
    }

    /// Step the pyramid down to `lod`, averaging 2×2 sample blocks and
    /// merging quarters into parent-tile grids.
    pub fn resize(&mut self, lod: Lod) {
        while self.lod > lod {
            self.step_down();
        }
    }

    fn step_down(&mut self) {
        let size = self.tile_size;
        let half = size / 2;
        let mut parents: HashMap<TileId, Vec<f32>> = HashMap::new();

        for (id, grid) in self.tiles.drain() {
            let parent_id = id.parent();
            let parent = parents
                .entry(parent_id)
                .or_insert_with(|| vec![INVALID_HEIGHT; (size * size) as usize]);
            let off_x = (id.x & 1) * half;
            let off_y = (id.y & 1) * half;

            for py in 0..half {
                for px in 0..half {
                    // average the valid samples of each 2x2 block
                    let mut sum = 0.0f32;
                    let mut n = 0u32;
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let v = grid[((2 * py + dy) * size + 2 * px + dx) as usize];
                            if v.is_finite() {
                                sum += v;
                                n += 1;
                            }
                        }
                    }
                    if n > 0 {
                        let value = sum / n as f32;
                        let cell =
                            &mut parent[((off_y + py) * size + off_x + px) as usize];
                        if value < *cell {
                            *cell = value;
                        }
                    }
                }
            }
        }

        self.tiles = parents;
        self.lod -= 1;
    }

    /// Navtile for a tile at the current LOD, `None` when no samples landed
    /// there. Invalid samples are filled with the tile's minimum height.
    pub fn navtile(&self, id: TileId) -> Option<NavTile> {
        if id.lod != self.lod {
            return None;
        }
        let grid = self.tiles.get(&id)?;
        let min = grid
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::INFINITY, f32::min);
        if !min.is_finite() {
            return None;
        }
        let filled: Vec<f32> = grid
            .iter()
            .map(|&v| if v.is_finite() { v } else { min })
            .collect();
        NavTile::from_data(filled).ok()
    }

    /// Tiles currently holding samples.
    pub fn tile_ids(&self) -> Vec<TileId> {
        let mut ids: Vec<TileId> = self.tiles.keys().copied().collect();
        ids.sort_unstable_by_key(|id| (id.y, id.x));
        ids
    }

    /// Position over the densest tile, framed by the global height span.
    pub fn best_position(&self, frame: &ReferenceFrame) -> Option<BestPosition> {
        let (best_id, _) = self
            .tiles
            .iter()
            .map(|(id, grid)| (id, grid.iter().filter(|v| v.is_finite()).count()))
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(id, n)| (*n, std::cmp::Reverse((id.y, id.x))))?;

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for grid in self.tiles.values() {
            for &v in grid {
                if v.is_finite() {
                    min = min.min(v);
                    max = max.max(v);
                }
            }
        }

        let node = NodeInfo::new(frame, *best_id);
        let (cx, cy) = node.extents().center();
        let span = f64::from(max - min);
        Some(BestPosition {
            location: [cx, cy, f64::from(min) + span / 2.0],
            vertical_extent: (span * 1.1).max(node.extents().width()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SubMesh;
    use crate::tileid::Extents2;

    fn flat_mesh(height: f64) -> Mesh {
        let mut mesh = Mesh::new();
        mesh.submeshes.push(SubMesh {
            vertices: vec![
                [0.0, 0.0, height],
                [1.0, 0.0, height],
                [1.0, 1.0, height],
                [0.0, 1.0, height],
            ],
            faces: vec![[0, 1, 2], [0, 2, 3]],
            ..Default::default()
        });
        mesh
    }

    #[test]
    fn test_accumulate_then_navtile() {
        let acc = HeightMapAccumulator::new(3);
        let id = TileId::new(3, 1, 1);
        acc.accumulate_mesh(id, &flat_mesh(7.0), &Extents2::unit());
        assert_eq!(acc.len(), 1);

        let hm = HeightMap::from_accumulator(acc);
        let nt = hm.navtile(id).unwrap();
        let range = nt.height_range().unwrap();
        assert_eq!(range.min, 7.0);
        assert_eq!(range.max, 7.0);
        assert!(hm.navtile(TileId::new(3, 0, 0)).is_none());
    }

    #[test]
    fn test_minimum_wins_on_overlap() {
        let acc = HeightMapAccumulator::new(2);
        let id = TileId::new(2, 0, 0);
        acc.accumulate_mesh(id, &flat_mesh(9.0), &Extents2::unit());
        acc.accumulate_mesh(id, &flat_mesh(4.0), &Extents2::unit());

        let hm = HeightMap::from_accumulator(acc);
        let nt = hm.navtile(id).unwrap();
        assert_eq!(nt.height_range().unwrap().max, 4.0);
    }

    #[test]
    fn test_resize_merges_into_parent_quadrants() {
        let acc = HeightMapAccumulator::new(4);
        acc.accumulate_mesh(TileId::new(4, 2, 2), &flat_mesh(10.0), &Extents2::unit());
        acc.accumulate_mesh(TileId::new(4, 3, 3), &flat_mesh(20.0), &Extents2::unit());

        let mut hm = HeightMap::from_accumulator(acc);
        hm.resize(3);
        assert_eq!(hm.lod(), 3);
        // both source tiles share the parent (3, 1, 1)
        assert_eq!(hm.tile_ids(), vec![TileId::new(3, 1, 1)]);
        let nt = hm.navtile(TileId::new(3, 1, 1)).unwrap();
        let range = nt.height_range().unwrap();
        assert_eq!(range.min, 10.0);
        assert_eq!(range.max, 20.0);
    }

    #[test]
    fn test_best_position_over_densest_tile() {
        let frame = ReferenceFrame::single("f", "srs", Extents2::new(0.0, 0.0, 16.0, 16.0));
        let acc = HeightMapAccumulator::new(2);
        acc.accumulate_mesh(TileId::new(2, 1, 1), &flat_mesh(5.0), &Extents2::unit());

        let hm = HeightMap::from_accumulator(acc);
        let best = hm.best_position(&frame).unwrap();
        // tile (2,1,1) of a 16-unit frame spans 4..8 on both axes
        assert_eq!(best.location[0], 6.0);
        assert_eq!(best.location[1], 6.0);
        assert_eq!(best.location[2], 5.0);
    }

    #[test]
    fn test_empty_accumulator_has_no_position() {
        let frame = ReferenceFrame::single("f", "srs", Extents2::unit());
        let hm = HeightMap::from_accumulator(HeightMapAccumulator::new(1));
        assert!(hm.best_position(&frame).is_none());
    }
}

//! Per-LOD quadtree stack mapping tiles to flag bits.
//!
//! The tile index answers "what exists where" for a whole tile set: one
//! compressed [`QTree`] per LOD, each cell holding a `u32` of [`flags`].
//! The low byte is reserved for the storage engine; higher bits are free
//! for traversal bookkeeping by callers.

pub mod flags;

mod io;

#[cfg(test)]
mod tests;

use crate::qtree::QTree;
use crate::tileid::{Lod, LodRange, TileId};

/// Which way [`TileIndex::set_mask`] applies its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOp {
    Set,
    Clear,
}

/// Stack of per-LOD flag quadtrees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileIndex {
    /// Lowest LOD with a tree; meaningless when `trees` is empty.
    min_lod: Lod,
    /// One tree per LOD, `trees[i]` covering `min_lod + i`.
    trees: Vec<QTree>,
}

impl TileIndex {
    /// Empty index covering no LODs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index with trees pre-allocated over `range`.
    pub fn with_range(range: LodRange) -> Self {
        let mut index = Self::new();
        if let LodRange::Range { min, max } = range {
            for lod in min..=max {
                index.tree_mut(lod);
            }
        }
        index
    }

    /// LODs that currently have a tree allocated.
    pub fn allocated_range(&self) -> LodRange {
        if self.trees.is_empty() {
            LodRange::Empty
        } else {
            LodRange::of(self.min_lod, self.min_lod + (self.trees.len() - 1) as Lod)
        }
    }

    /// Smallest LOD range containing any material flag.
    pub fn lod_range(&self) -> LodRange {
        let mut range = LodRange::Empty;
        for (lod, tree) in self.lod_trees() {
            if tree.any(|v| v & flags::MATERIAL != 0) {
                range.include(lod);
            }
        }
        range
    }

    fn lod_trees(&self) -> impl Iterator<Item = (Lod, &QTree)> {
        let min = self.min_lod;
        self.trees
            .iter()
            .enumerate()
            .map(move |(i, t)| (min + i as Lod, t))
    }

    fn tree(&self, lod: Lod) -> Option<&QTree> {
        if self.trees.is_empty() || lod < self.min_lod {
            return None;
        }
        self.trees.get((lod - self.min_lod) as usize)
    }

    /// Tree for `lod`, growing the stack as needed.
    fn tree_mut(&mut self, lod: Lod) -> &mut QTree {
        if self.trees.is_empty() {
            self.min_lod = lod;
            self.trees.push(QTree::new(lod, 0));
        } else if lod < self.min_lod {
            let mut head: Vec<QTree> = (lod..self.min_lod).map(|l| QTree::new(l, 0)).collect();
            head.append(&mut self.trees);
            self.trees = head;
            self.min_lod = lod;
        } else {
            while (lod - self.min_lod) as usize >= self.trees.len() {
                let next = self.min_lod + self.trees.len() as Lod;
                self.trees.push(QTree::new(next, 0));
            }
        }
        &mut self.trees[(lod - self.min_lod) as usize]
    }

    /// Flags at a tile; 0 when the tile or its LOD is absent.
    pub fn get(&self, id: TileId) -> u32 {
        self.tree(id.lod).map_or(0, |t| t.get(id.x, id.y))
    }

    /// Overwrite the flags at a tile.
    pub fn set(&mut self, id: TileId, value: u32) {
        self.tree_mut(id.lod).set(id.x, id.y, value);
    }

    /// Set or clear the `mask` bits at a tile, leaving other bits alone.
    pub fn set_mask(&mut self, id: TileId, mask: u32, op: MaskOp) {
        let old = self.get(id);
        let new = match op {
            MaskOp::Set => old | mask,
            MaskOp::Clear => old & !mask,
        };
        if new != old {
            self.set(id, new);
        }
    }

    /// Whether a tile carries any material flag.
    pub fn exists(&self, id: TileId) -> bool {
        self.get(id) & flags::MATERIAL != 0
    }

    /// Whether any tile anywhere carries a material flag.
    pub fn is_empty(&self) -> bool {
        !self
            .lod_trees()
            .any(|(_, t)| t.any(|v| v & flags::MATERIAL != 0))
    }

    /// Visit every tile with a non-zero value at `lod`, in row-major order.
    pub fn traverse<F: FnMut(TileId, u32)>(&self, lod: Lod, mut f: F) {
        let Some(tree) = self.tree(lod) else {
            return;
        };
        let mut cells: Vec<(u32, u32, u32)> = Vec::new();
        tree.for_each_quad(|x, y, size, v| {
            if v != 0 {
                for dy in 0..size {
                    for dx in 0..size {
                        cells.push((x + dx, y + dy, v));
                    }
                }
            }
        });
        cells.sort_unstable_by_key(|&(x, y, _)| (y, x));
        for (x, y, v) in cells {
            f(TileId::new(lod, x, y), v);
        }
    }

    /// Mark the has-children bit on every ancestor of every present tile,
    /// all the way up to LOD 0. Idempotent.
    pub fn make_absolute(&mut self) -> &mut Self {
        let Some(max) = self.allocated_range().max() else {
            return self;
        };
        for lod in (1..=max).rev() {
            let mut parents: Vec<TileId> = Vec::new();
            if let Some(tree) = self.tree(lod) {
                tree.for_each_quad(|x, y, size, v| {
                    if v & (flags::MATERIAL | flags::CHILDREN) != 0 {
                        // parents of a uniform quad form the quad shrunk by one level
                        let (px0, py0) = (x / 2, y / 2);
                        let (px1, py1) = ((x + size - 1) / 2, (y + size - 1) / 2);
                        for py in py0..=py1 {
                            for px in px0..=px1 {
                                parents.push(TileId::new(lod - 1, px, py));
                            }
                        }
                    }
                });
            }
            for parent in parents {
                self.set_mask(parent, flags::CHILDREN, MaskOp::Set);
            }
        }
        self
    }

    /// Push the has-children bit down: every descendant of a material tile,
    /// to the deepest allocated LOD, is marked. Idempotent.
    pub fn make_complete(&mut self) -> &mut Self {
        let range = self.allocated_range();
        let (Some(min), Some(max)) = (range.min(), range.max()) else {
            return self;
        };
        // cells pushing the bit down; material seeds it, completion-derived
        // cells carry it further (ancestors marked by make_absolute do not)
        let mut carry: Option<QTree> = None;
        for lod in min..max {
            let mut pusher = match self.tree(lod) {
                Some(tree) => tree.map(|v| u32::from(v & flags::MATERIAL != 0)),
                None => QTree::new(lod, 0),
            };
            if let Some(c) = carry {
                pusher = pusher.combine(&c, |a, b| a | b);
            }

            let mut blocks: Vec<(u32, u32, u32)> = Vec::new();
            pusher.for_each_quad(|x, y, size, v| {
                if v != 0 {
                    blocks.push((x, y, size));
                }
            });
            if blocks.is_empty() {
                carry = None;
                continue;
            }

            // plain fill would erase child flags; build a marker tree and OR it in
            let mut marker = QTree::new(lod + 1, 0);
            for (x, y, size) in blocks {
                marker.fill(2 * x, 2 * y, 2 * (x + size), 2 * (y + size), flags::CHILDREN);
            }
            let merged = self.tree_mut(lod + 1).combine(&marker, |a, b| a | b);
            *self.tree_mut(lod + 1) = merged;
            carry = Some(marker.map(|v| u32::from(v != 0)));
        }
        self
    }

    /// Union of [`make_absolute`](Self::make_absolute) and
    /// [`make_complete`](Self::make_complete).
    pub fn make_full(&mut self) -> &mut Self {
        self.make_absolute().make_complete()
    }

    /// New index with every tile shifted by `(dx, dy)` in its grid and the
    /// whole stack moved by `dlod` levels.
    pub fn translate(&self, dx: i64, dy: i64, dlod: i16) -> TileIndex {
        let mut out = TileIndex::new();
        for (lod, tree) in self.lod_trees() {
            let new_lod = i32::from(lod) + i32::from(dlod);
            if !(0..=i32::from(Lod::MAX)).contains(&new_lod) {
                continue;
            }
            let new_lod = new_lod as Lod;
            let domain = 1u64 << new_lod;
            tree.for_each_quad(|x, y, size, v| {
                if v == 0 {
                    return;
                }
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if nx < 0 || ny < 0 || nx as u64 >= domain || ny as u64 >= domain {
                    return;
                }
                let x1 = ((nx as u64 + u64::from(size)).min(domain)) as u32;
                let y1 = ((ny as u64 + u64::from(size)).min(domain)) as u32;
                out.tree_mut(new_lod).fill(nx as u32, ny as u32, x1, y1, v);
            });
        }
        out
    }

    fn combined(&self, other: &TileIndex, op: impl Fn(u32, u32) -> u32 + Copy) -> TileIndex {
        let range = self.allocated_range().union(&other.allocated_range());
        let mut out = TileIndex::new();
        for lod in range.iter() {
            let result = match (self.tree(lod), other.tree(lod)) {
                (Some(a), Some(b)) => a.combine(b, op),
                (Some(a), None) => a.combine(&QTree::new(lod, 0), op),
                (None, Some(b)) => QTree::new(lod, 0).combine(b, op),
                (None, None) => continue,
            };
            *out.tree_mut(lod) = result;
        }
        out
    }

    /// Per-LOD bitwise OR of both indexes.
    pub fn unite(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a | b)
    }

    /// Per-LOD bitwise AND of both indexes.
    pub fn intersect(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a & b)
    }

    /// Flags of `self` with `other`'s flags removed where tiles coincide.
    pub fn subtract(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a & !b)
    }

    /// Copy of the index restricted to LODs inside `range`.
    pub fn clipped(&self, range: LodRange) -> TileIndex {
        let mut out = TileIndex::new();
        for (lod, tree) in self.lod_trees() {
            if range.contains(lod) {
                *out.tree_mut(lod) = tree.clone();
            }
        }
        out
    }

    /// Index keeping only tiles whose flags intersect `mask`.
    pub fn filtered(&self, mask: u32) -> TileIndex {
        let mut out = TileIndex::new();
        for (lod, tree) in self.lod_trees() {
            *out.tree_mut(lod) = tree.map(|v| if v & mask != 0 { v } else { 0 });
        }
        out
    }

    /// Sphere of influence: tiles of `mask` type plus all tiles above and
    /// below them in the pyramid. Non-zero cells are influenced.
    pub fn sphere_of_influence(&self, range: LodRange, mask: u32) -> TileIndex {
        let range = if range.is_empty() { self.lod_range() } else { range };
        let mut soi = self.clipped(range).filtered(mask);
        for lod in range.iter() {
            soi.tree_mut(lod);
        }
        soi.make_full();
        soi
    }
}

//! Materialised node information.

use crate::qtree::RasterMask;
use crate::tileid::{Child, Extents2, TileId};

use super::node::ReferenceFrame;

/// Where a node sits relative to its subtree's valid area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Completely outside the valid area
    Invalid,
    /// Straddles the valid boundary
    Partial,
    /// Completely inside the valid area
    Full,
}

/// Coordinate contract of one tile: subtree membership, extents in the
/// subtree SRS and validity against the subtree's valid area.
///
/// A value view into the reference frame; holds no references, so it can be
/// passed between encoder workers freely.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    node_id: TileId,
    subtree_id: TileId,
    srs: String,
    extents: Extents2,
    valid_extents: Option<Extents2>,
    validity: Validity,
    external_texture: bool,
}

impl NodeInfo {
    /// Node info of the reference-frame root.
    pub fn root(frame: &ReferenceFrame) -> NodeInfo {
        Self::new(frame, frame.root().id)
    }

    /// Materialise the node at `id`.
    ///
    /// The subtree root is found in the frame, then the node's extents are
    /// derived by quadrant descent from the root's extents.
    pub fn new(frame: &ReferenceFrame, id: TileId) -> NodeInfo {
        let Some(subtree) = frame.subtree_root(id) else {
            // outside every declared subtree
            return NodeInfo {
                node_id: id,
                subtree_id: id,
                srs: String::new(),
                extents: Extents2::new(0.0, 0.0, 0.0, 0.0),
                valid_extents: None,
                validity: Validity::Invalid,
                external_texture: false,
            };
        };

        let mut extents = subtree.extents;
        for lod in (subtree.id.lod..id.lod).rev() {
            // child slot at each level comes from the coordinate bits
            let shift = id.lod - lod - 1;
            let dx = (id.x >> shift) & 1;
            let dy = (id.y >> shift) & 1;
            extents = extents.child(Child::from_index((dy * 2 + dx) as usize));
        }

        let validity = match &subtree.valid_extents {
            None => Validity::Full,
            Some(valid) => {
                if valid.covers(&extents) {
                    Validity::Full
                } else if valid.intersects(&extents) {
                    Validity::Partial
                } else {
                    Validity::Invalid
                }
            }
        };

        NodeInfo {
            node_id: id,
            subtree_id: subtree.id,
            srs: subtree.srs.clone(),
            extents,
            valid_extents: subtree.valid_extents,
            validity,
            external_texture: subtree.external_texture,
        }
    }

    /// Child node info. Defined only for valid parents; an invalid parent
    /// yields `None`.
    pub fn child(&self, frame: &ReferenceFrame, child: Child) -> Option<NodeInfo> {
        if !self.valid() {
            return None;
        }
        Some(Self::new(frame, self.node_id.child(child)))
    }

    pub fn node_id(&self) -> TileId {
        self.node_id
    }

    /// Id of the subtree root this node belongs to.
    pub fn subtree_id(&self) -> TileId {
        self.subtree_id
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    /// Node extents in the subtree SRS.
    pub fn extents(&self) -> &Extents2 {
        &self.extents
    }

    /// Distance from the subtree root.
    pub fn distance_from_root(&self) -> u8 {
        self.node_id.lod - self.subtree_id.lod
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    /// Not completely outside the valid area.
    pub fn valid(&self) -> bool {
        self.validity != Validity::Invalid
    }

    /// Partial node: inside the valid area, but not fully.
    ///
    /// A node fully outside the valid bounds is invalid, not partial.
    pub fn partial(&self) -> bool {
        self.validity == Validity::Partial
    }

    /// Rasterise the node's validity into a `size × size` mask.
    ///
    /// Invalid nodes are fully black, full nodes fully white, partial nodes
    /// get the valid-area rectangle scan-converted into the grid.
    pub fn coverage_mask(&self, size: u32) -> RasterMask {
        match self.validity {
            Validity::Invalid => RasterMask::empty(size),
            Validity::Full => RasterMask::full(size),
            Validity::Partial => {
                let mut mask = RasterMask::empty(size);
                let valid = self
                    .valid_extents
                    .expect("partial node always has valid extents");
                let fsize = f64::from(size);
                let to_px = |v: f64, min: f64, span: f64| ((v - min) / span * fsize).round();
                let span_x = self.extents.width();
                let span_y = self.extents.height();
                let x0 = to_px(valid.min_x, self.extents.min_x, span_x).clamp(0.0, fsize) as u32;
                let x1 = to_px(valid.max_x, self.extents.min_x, span_x).clamp(0.0, fsize) as u32;
                let y0 = to_px(valid.min_y, self.extents.min_y, span_y).clamp(0.0, fsize) as u32;
                let y1 = to_px(valid.max_y, self.extents.min_y, span_y).clamp(0.0, fsize) as u32;
                mask.fill(x0, y0, x1, y1, true);
                mask
            }
        }
    }
}

/// Whether two nodes share one subtree (and therefore one SRS).
pub fn compatible(a: &NodeInfo, b: &NodeInfo) -> bool {
    a.subtree_id == b.subtree_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refframe::RFNode;

    fn frame_with_validity() -> ReferenceFrame {
        let mut root = RFNode::new(TileId::ROOT, "srs", Extents2::new(0.0, 0.0, 4.0, 4.0));
        root.valid_extents = Some(Extents2::new(0.0, 0.0, 3.0, 3.0));
        ReferenceFrame::new("partial", vec![root]).unwrap()
    }

    #[test]
    fn test_root_is_partial_when_validity_clipped() {
        let frame = frame_with_validity();
        let root = NodeInfo::root(&frame);
        assert_eq!(root.validity(), Validity::Partial);
        assert!(root.valid());
        assert!(root.partial());
    }

    #[test]
    fn test_child_validity_classification() {
        let frame = frame_with_validity();
        let root = NodeInfo::root(&frame);

        // lower-left child (0..2, 0..2) sits inside the valid 0..3 square
        let ll = root.child(&frame, Child::LowerLeft).unwrap();
        assert_eq!(ll.validity(), Validity::Full);
        assert_eq!(*ll.extents(), Extents2::new(0.0, 0.0, 2.0, 2.0));

        // upper-right child (2..4, 2..4) straddles the boundary at 3
        let ur = root.child(&frame, Child::UpperRight).unwrap();
        assert_eq!(ur.validity(), Validity::Partial);

        // upper-right grandchild (3..4, 3..4) is fully outside
        let far = ur.child(&frame, Child::UpperRight).unwrap();
        assert_eq!(far.validity(), Validity::Invalid);
        assert!(!far.valid());

        // children of an invalid node are undefined
        assert!(far.child(&frame, Child::LowerLeft).is_none());
    }

    #[test]
    fn test_extents_descend_by_quadrant() {
        let frame = ReferenceFrame::single("f", "srs", Extents2::new(0.0, 0.0, 8.0, 8.0));
        let info = NodeInfo::new(&frame, TileId::new(3, 5, 2));
        assert_eq!(*info.extents(), Extents2::new(5.0, 2.0, 6.0, 3.0));
        assert_eq!(info.distance_from_root(), 3);
    }

    #[test]
    fn test_coverage_mask_flavours() {
        let frame = frame_with_validity();
        let root = NodeInfo::root(&frame);

        let full = NodeInfo::new(&frame, TileId::new(2, 0, 0)).coverage_mask(8);
        assert!(full.is_full());

        let partial = root.coverage_mask(8);
        // valid 0..3 of 0..4 extents covers 6 of 8 pixels per axis
        assert_eq!(partial.count(), 36);

        let invalid = NodeInfo::new(&frame, TileId::new(2, 3, 3)).coverage_mask(8);
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_compatible_same_subtree() {
        let frame = frame_with_validity();
        let a = NodeInfo::new(&frame, TileId::new(2, 0, 0));
        let b = NodeInfo::new(&frame, TileId::new(3, 1, 1));
        assert!(compatible(&a, &b));
    }
}

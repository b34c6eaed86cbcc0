//! Reference-frame division tree.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tileid::{Extents2, TileId};

/// How a node's children divide its extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Subdivision {
    /// Children split the extents geometrically at the midpoint
    Geometric,
    /// Children subdivide a pixel grid (heightmap-style frames)
    Pixel,
}

/// One division node of a reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RFNode {
    /// Subtree-rooted tile id of this node
    pub id: TileId,
    /// Spatial reference system of the subtree below this node
    pub srs: String,
    /// Extents of this node in its own SRS
    pub extents: Extents2,
    /// Subdivision scheme below this node
    pub subdivision: Subdivision,
    /// Valid area within the extents; `None` means the whole node is valid.
    /// A node whose derived extents only straddle this area is *partial*.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_extents: Option<Extents2>,
    /// Whether meshes under this node carry external texture coordinates
    #[serde(default)]
    pub external_texture: bool,
}

impl RFNode {
    /// Plain full-validity node.
    pub fn new(id: TileId, srs: impl Into<String>, extents: Extents2) -> Self {
        Self {
            id,
            srs: srs.into(),
            extents,
            subdivision: Subdivision::Geometric,
            valid_extents: None,
            external_texture: false,
        }
    }
}

/// Directed tree of division nodes sharing a root.
///
/// Nodes are stored in an arena ordered root-first; parent/child links are
/// derived from tile-id containment, so there are no ownership cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceFrame {
    /// Frame identifier, referenced from tile-set configs
    pub id: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Metatiles pack `(2^meta_binary_order)²` nodes
    pub meta_binary_order: u8,
    nodes: Vec<RFNode>,
}

/// Default metatile binary order: 32x32 nodes per metatile.
pub const DEFAULT_META_BINARY_ORDER: u8 = 5;

impl ReferenceFrame {
    /// Build a frame from its division nodes.
    ///
    /// The first node must be the root (it contains every other node).
    pub fn new(id: impl Into<String>, nodes: Vec<RFNode>) -> Result<Self> {
        let id = id.into();
        let root = nodes
            .first()
            .ok_or_else(|| Error::InconsistentInput(format!("reference frame {}: no nodes", id)))?;
        for node in &nodes[1..] {
            if !root.id.contains(node.id) {
                return Err(Error::InconsistentInput(format!(
                    "reference frame {}: node {} outside root {}",
                    id, node.id, root.id
                )));
            }
        }
        Ok(Self {
            id,
            description: String::new(),
            meta_binary_order: DEFAULT_META_BINARY_ORDER,
            nodes,
        })
    }

    /// Single-subtree frame: one root node at LOD 0.
    pub fn single(id: impl Into<String>, srs: impl Into<String>, extents: Extents2) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            meta_binary_order: DEFAULT_META_BINARY_ORDER,
            nodes: vec![RFNode::new(TileId::ROOT, srs, extents)],
        }
    }

    /// Root division node.
    pub fn root(&self) -> &RFNode {
        &self.nodes[0]
    }

    /// All division nodes, root first.
    pub fn nodes(&self) -> &[RFNode] {
        &self.nodes
    }

    /// Exact division node at `id`, if one is declared there.
    pub fn division_node(&self, id: TileId) -> Option<&RFNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Deepest division node whose subtree contains `id`.
    pub fn subtree_root(&self, id: TileId) -> Option<&RFNode> {
        self.nodes
            .iter()
            .filter(|n| n.id.contains(id))
            .max_by_key(|n| n.id.lod)
    }
}

//! Reference frames, node materialisation and the registry.
//!
//! A reference frame is a directed tree of division nodes. Each node roots a
//! *subtree*: the closure of its children sharing one spatial reference
//! system. [`NodeInfo`] materialises the coordinate contract of a single
//! tile: which subtree it belongs to, its extents in that subtree's SRS and
//! whether it lies fully, partially or not at all inside the valid area.

mod node;
mod nodeinfo;
mod registry;

pub use node::{RFNode, ReferenceFrame, Subdivision, DEFAULT_META_BINARY_ORDER};
pub use nodeinfo::{compatible, NodeInfo, Validity};
pub use registry::{BoundLayer, Credit, Registry};

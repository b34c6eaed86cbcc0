//! Tile index flag bits.
//!
//! The low byte belongs to the storage engine. Everything above
//! [`ENGINE_MASK`] is free for caller-side traversal bookkeeping and is
//! never interpreted here.

/// Tile has a mesh payload.
pub const MESH: u32 = 0x01;

/// Tile has a texture atlas payload.
pub const ATLAS: u32 = 0x02;

/// Tile has a navigation height grid payload.
pub const NAVTILE: u32 = 0x04;

/// Metatile covering this cell's block exists (set on the metatile id).
pub const META: u32 = 0x08;

/// Tile refers to a sibling set inside a glue instead of carrying data.
pub const REFERENCE: u32 = 0x10;

/// Tile lies in another set's sphere of influence.
pub const INFLUENCED: u32 = 0x20;

/// Virtual tile: mesh sentinel without an atlas of its own.
pub const ALIEN: u32 = 0x40;

/// Some descendant (or ancestor, after completion) is material.
pub const CHILDREN: u32 = 0x80;

/// Bits that make a tile count as present.
pub const MATERIAL: u32 = MESH | ATLAS | NAVTILE | META | REFERENCE;

/// Bits carrying actual payload data.
pub const CONTENT: u32 = MESH | ATLAS | NAVTILE;

/// All bits reserved by the storage engine.
pub const ENGINE_MASK: u32 = 0xff;

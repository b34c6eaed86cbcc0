//! Tilevault - storage engine for hierarchically tiled 3D terrain.
//!
//! A *tile set* is an append-mostly store of per-tile surface data (meshes,
//! texture atlases, navigation height grids and metadata) addressed by
//! `(lod, x, y)` triples under a pyramidal level-of-detail scheme attached
//! to a geodetic reference frame. A pluggable [`driver::Driver`] holds the
//! physical bytes; the default backend groups tiles of a LOD into
//! content-addressed, crash-safe [`tilar`] archives.
//!
//! # High-Level API
//!
//! ```ignore
//! use tilevault::tileset::{TileSet, TileSetProperties, CreateMode, OpenMode};
//! use tilevault::refframe::Registry;
//!
//! let registry = Registry::with_frame(frame);
//! let mut ts = TileSet::create(path, properties, &registry, CreateMode::FailIfExists)?;
//! ts.set_tile(tile_id, tile, None)?;
//! ts.flush()?;
//!
//! let ts = TileSet::open(path, &registry, OpenMode::ReadOnly)?;
//! let mesh = ts.get_mesh(tile_id)?;
//! ```

pub mod atlas;
pub mod binio;
pub mod compose;
pub mod delivery;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod mesh;
pub mod meta;
pub mod navtile;
pub mod qtree;
pub mod refframe;
pub mod tilar;
pub mod tileid;
pub mod tileindex;
pub mod tileset;

pub use error::{Error, Result};

/// Version of the tilevault library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

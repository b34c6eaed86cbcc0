//! Tile sets: driver + tile index + metadata.
//!
//! A tile set composes a [`Driver`] holding the physical bytes, a
//! [`TileIndex`] answering presence queries and the metadata machinery that
//! keeps metatiles consistent with stored payloads. The lifecycle is
//! create → populate with [`TileSet::set_tile`] → [`TileSet::flush`] →
//! reopen read-only (or read-write to keep populating). A set that was
//! never flushed is unreadable.

mod config;

#[cfg(test)]
mod tests;

pub use config::{HeightMode, Position, PositionType, TileSetProperties};

pub(crate) use config::{config_bytes, parse_config};

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::atlas::Atlas;
use crate::driver::{
    open_from_config, Driver, Mode, PlainDriver, StoreFile, TilarDriver, TilarDriverOptions,
    TileFile,
};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::meta::{node_flags, MetaNode, MetaTile};
use crate::navtile::NavTile;
use crate::refframe::{NodeInfo, ReferenceFrame, Registry};
use crate::tileid::{meta_id, LodRange, TileId};
use crate::tileindex::{flags, MaskOp, TileIndex};

/// What to do when the creation target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    FailIfExists,
    Overwrite,
}

/// Tile-set access mode.
pub type OpenMode = Mode;

/// Content of one tile as handed to [`TileSet::set_tile`].
#[derive(Debug, Clone, Default)]
pub struct Tile {
    pub mesh: Option<Mesh>,
    pub atlas: Option<Atlas>,
    pub navtile: Option<NavTile>,
    /// Credits attributed to this tile
    pub credits: BTreeSet<u16>,
    /// Virtual tile: mesh sentinel allowed to have no atlas
    pub alien: bool,
}

/// Raw payload bytes of one tile, used for re-encode-free transfer.
#[derive(Debug, Clone)]
pub struct TileSource {
    pub mesh: Option<Vec<u8>>,
    pub atlas: Option<Vec<u8>>,
    pub navtile: Option<Vec<u8>>,
    /// Engine flag bits of the source tile
    pub flags: u32,
    pub meta: MetaNode,
}

/// Tile set handle.
pub struct TileSet {
    root: PathBuf,
    driver: Box<dyn Driver>,
    properties: TileSetProperties,
    reference_frame: ReferenceFrame,
    index: TileIndex,
    meta_binary_order: u8,
    /// Metanodes written since open, keyed by tile; drained at flush
    pending_meta: HashMap<TileId, MetaNode>,
    mode: Mode,
    changed: bool,
    watch: Option<CancellationToken>,
}

impl TileSet {
    /// Create a new tile set at `path`.
    ///
    /// `properties.driver_options` selects the backend (`"driver": "plain"`
    /// for the one-file-per-key store); the default is the tilar backend.
    pub fn create(
        path: &Path,
        mut properties: TileSetProperties,
        registry: &Registry,
        mode: CreateMode,
    ) -> Result<TileSet> {
        let reference_frame = registry.reference_frame(&properties.reference_frame)?.clone();

        if path.exists() {
            match mode {
                CreateMode::FailIfExists => return Err(Error::AlreadyExists(path.to_path_buf())),
                CreateMode::Overwrite => fs::remove_dir_all(path)?,
            }
        }

        let plain = properties
            .driver_options
            .get("driver")
            .and_then(serde_json::Value::as_str)
            == Some("plain");
        let driver: Box<dyn Driver> = if plain {
            Box::new(PlainDriver::create(path)?)
        } else {
            // honour binaryOrder/uuid overrides supplied by the caller
            let mut options = TilarDriverOptions::default();
            if let Some(bo) = properties
                .driver_options
                .get("binaryOrder")
                .and_then(serde_json::Value::as_u64)
            {
                options.binary_order = u8::try_from(bo).map_err(|_| {
                    Error::InconsistentInput("binaryOrder out of range".to_string())
                })?;
            }
            if let Some(uuid) = properties
                .driver_options
                .get("uuid")
                .and_then(serde_json::Value::as_str)
            {
                options.uuid = uuid::Uuid::parse_str(uuid)
                    .map_err(|e| Error::InconsistentInput(format!("bad driver uuid: {}", e)))?;
            }
            Box::new(TilarDriver::create(path, options)?)
        };
        properties.driver_options = driver.options_json();

        info!(id = %properties.id, path = %path.display(), "created tile set");
        Ok(TileSet {
            root: path.to_path_buf(),
            meta_binary_order: reference_frame.meta_binary_order,
            driver,
            properties,
            reference_frame,
            index: TileIndex::new(),
            pending_meta: HashMap::new(),
            mode: Mode::ReadWrite,
            changed: true,
            watch: None,
        })
    }

    /// Open an existing, flushed tile set.
    pub fn open(path: &Path, registry: &Registry, mode: OpenMode) -> Result<TileSet> {
        let config_path = path.join(StoreFile::Config.filename());
        let bytes = fs::read(&config_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFile(config_path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let properties = config::parse_config(&bytes, &config_path.display().to_string())?;
        let reference_frame = registry.reference_frame(&properties.reference_frame)?.clone();

        let driver = open_from_config(path, &properties.driver_options, mode)?;
        let index_stream = driver.input_file(StoreFile::TileIndex)?;
        let index = TileIndex::deserialize(index_stream.bytes(), index_stream.name())?;

        debug!(id = %properties.id, path = %path.display(), ?mode, "opened tile set");
        Ok(TileSet {
            root: path.to_path_buf(),
            meta_binary_order: reference_frame.meta_binary_order,
            driver,
            properties,
            reference_frame,
            index,
            pending_meta: HashMap::new(),
            mode,
            changed: false,
            watch: None,
        })
    }

    /// Cheap probe whether `path` holds a tile set.
    pub fn check(path: &Path) -> bool {
        path.join(StoreFile::Config.filename()).is_file()
    }

    pub fn properties(&self) -> &TileSetProperties {
        &self.properties
    }

    pub fn id(&self) -> &str {
        &self.properties.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reference_frame(&self) -> &ReferenceFrame {
        &self.reference_frame
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Id of the metatile a tile belongs to.
    pub fn meta_id(&self, id: TileId) -> TileId {
        meta_id(id, self.meta_binary_order)
    }

    /// Replace the default viewing position.
    pub fn set_position(&mut self, position: Position) {
        self.properties.position = position;
        self.changed = true;
    }

    /// Register credits used by this tile set.
    pub fn add_credits(&mut self, credits: impl IntoIterator<Item = u16>) {
        self.properties.credits.extend(credits);
        self.changed = true;
    }

    /// Register bound layers used by this tile set.
    pub fn add_bound_layers(&mut self, layers: impl IntoIterator<Item = u16>) {
        self.properties.bound_layers.extend(layers);
        self.changed = true;
    }

    /// Attach a cancellation token observed by long-running operations.
    pub fn watch(&mut self, token: CancellationToken) {
        self.driver.watch(token.clone());
        self.watch = Some(token);
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.watch {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::ReadOnly(self.properties.id.clone()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    pub fn get_mesh(&self, id: TileId) -> Result<Mesh> {
        let stream = self.driver.input(id, TileFile::Mesh)?;
        Mesh::deserialize(stream.bytes(), stream.name())
    }

    pub fn get_atlas(&self, id: TileId) -> Result<Atlas> {
        let stream = self.driver.input(id, TileFile::Atlas)?;
        Atlas::deserialize(stream.bytes(), stream.name())
    }

    pub fn get_nav_tile(&self, id: TileId) -> Result<NavTile> {
        let stream = self.driver.input(id, TileFile::NavTile)?;
        NavTile::deserialize(stream.bytes(), stream.name())
    }

    pub fn get_meta_tile(&self, meta: TileId) -> Result<MetaTile> {
        let stream = self.driver.input(self.meta_id(meta), TileFile::Meta)?;
        MetaTile::deserialize(stream.bytes(), stream.name())
    }

    pub fn get_meta_node(&self, id: TileId) -> Result<MetaNode> {
        if let Some(node) = self.pending_meta.get(&id) {
            return Ok(node.clone());
        }
        let tile = self.get_meta_tile(id)?;
        tile.get(id)
            .cloned()
            .ok_or_else(|| Error::NoSuchFile(format!("{}.meta-node", id)))
    }

    /// Glue source rank for a tile; 0 means the tile is its own data.
    pub fn get_reference(&self, id: TileId) -> Result<u16> {
        match self.get_meta_node(id) {
            Ok(node) => Ok(node.reference),
            Err(Error::NoSuchFile(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Raw payload bytes for re-encode-free transfer.
    pub fn get_tile_source(&self, id: TileId) -> Result<TileSource> {
        let tile_flags = self.index.get(id);
        if tile_flags & flags::MATERIAL == 0 {
            return Err(Error::NoSuchFile(format!("{}", id)));
        }
        let grab = |file: TileFile| -> Result<Option<Vec<u8>>> {
            Ok(self
                .driver
                .input_opt(id, file)?
                .map(crate::driver::IStream::into_bytes))
        };
        Ok(TileSource {
            mesh: grab(TileFile::Mesh)?,
            atlas: grab(TileFile::Atlas)?,
            navtile: grab(TileFile::NavTile)?,
            flags: tile_flags & flags::ENGINE_MASK,
            meta: self.get_meta_node(id)?,
        })
    }

    pub fn exists(&self, id: TileId) -> bool {
        self.index.exists(id)
    }

    /// Tile has a mesh and its coverage mask is fully set.
    pub fn fully_covered(&self, id: TileId) -> Result<bool> {
        if self.index.get(id) & flags::MESH == 0 {
            return Ok(false);
        }
        Ok(self.get_mesh(id)?.coverage.is_full())
    }

    pub fn empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lod_range(&self) -> LodRange {
        self.index.lod_range()
    }

    pub fn tile_index(&self) -> &TileIndex {
        &self.index
    }

    /// Tile index restricted to a LOD range.
    pub fn tile_index_clipped(&self, range: LodRange) -> TileIndex {
        self.index.clipped(range)
    }

    /// Sphere of influence of this set's tiles of the given flag type.
    pub fn sphere_of_influence(&self, range: LodRange, mask: u32) -> TileIndex {
        self.index.sphere_of_influence(range, mask)
    }

    pub fn last_modified(&self) -> std::time::SystemTime {
        self.driver.last_modified()
    }

    /// Whether this set could store tiles under the given node.
    pub fn can_contain(&self, node: &NodeInfo) -> bool {
        node.valid() && self.reference_frame.subtree_root(node.node_id()).is_some()
    }

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    /// Store one tile's payloads and derived metadata.
    ///
    /// When `node_info` is not supplied it is derived from the reference
    /// frame; a supplied value is trusted.
    pub fn set_tile(&mut self, id: TileId, tile: &Tile, node_info: Option<&NodeInfo>) -> Result<()> {
        self.check_writable()?;
        self.check_cancelled()?;
        if !id.valid() {
            return Err(Error::InconsistentInput(format!(
                "tile id {} outside its grid",
                id
            )));
        }

        let derived;
        let node = match node_info {
            Some(supplied) => supplied,
            None => {
                derived = NodeInfo::new(&self.reference_frame, id);
                &derived
            }
        };
        if !node.valid() {
            return Err(Error::InconsistentInput(format!(
                "tile {} lies outside the reference frame's valid area",
                id
            )));
        }

        if tile.mesh.is_some() && tile.atlas.is_none() && !tile.alien {
            return Err(Error::InconsistentInput(format!(
                "tile {}: mesh without atlas",
                id
            )));
        }
        if tile.atlas.is_some() && tile.mesh.is_none() {
            return Err(Error::InconsistentInput(format!(
                "tile {}: atlas without mesh",
                id
            )));
        }
        if tile.navtile.is_some() && tile.mesh.is_none() {
            return Err(Error::InconsistentInput(format!(
                "tile {}: navtile requires a mesh",
                id
            )));
        }

        let mut tile_flags = 0u32;
        let mut node_bits = 0u8;

        if let Some(mesh) = &tile.mesh {
            mesh.validate()?;
            if let Some(atlas) = &tile.atlas {
                if atlas.len() != mesh.submeshes.len() {
                    return Err(Error::InconsistentInput(format!(
                        "tile {}: {} atlas images for {} submeshes",
                        id,
                        atlas.len(),
                        mesh.submeshes.len()
                    )));
                }
            }

            let mut mesh = mesh.clone();
            if mesh.coverage.is_empty() && mesh.face_count() > 0 {
                mesh.rasterize_coverage(node.extents());
            }
            self.write_payload(id, TileFile::Mesh, &mesh.serialize())?;
            tile_flags |= flags::MESH;
            node_bits |= node_flags::MESH;

            if let Some(atlas) = &tile.atlas {
                self.write_payload(id, TileFile::Atlas, &atlas.serialize())?;
                tile_flags |= flags::ATLAS;
                node_bits |= node_flags::ATLAS;
            }
            if let Some(navtile) = &tile.navtile {
                self.write_payload(id, TileFile::NavTile, &navtile.serialize())?;
                tile_flags |= flags::NAVTILE;
                node_bits |= node_flags::NAVTILE;
            }

            let mut meta = MetaNode {
                flags: node_bits,
                display_size: 256,
                credits: tile.credits.clone(),
                ..Default::default()
            };
            if let Some(e) = mesh.extents3() {
                meta.extents = e.map(|v| v as f32);
            }
            if let Some((lo, hi)) = mesh.height_range() {
                meta.update_height_range(lo as f32, hi as f32);
            }
            if let Some(navtile) = &tile.navtile {
                if let Some(range) = navtile.height_range() {
                    meta.update_height_range(range.min, range.max);
                }
            }
            meta.texel_size = texel_size(node, &mesh, tile.atlas.as_ref());
            self.pending_meta.insert(id, meta);
        }

        if tile.alien {
            tile_flags |= flags::ALIEN;
        }
        if tile_flags == 0 {
            return Err(Error::InconsistentInput(format!("tile {} carries no payload", id)));
        }

        self.index.set_mask(id, tile_flags, MaskOp::Set);
        self.changed = true;
        Ok(())
    }

    /// Store a navtile for a tile that already has a mesh.
    pub fn set_nav_tile(&mut self, id: TileId, navtile: &NavTile) -> Result<()> {
        self.check_writable()?;
        if self.index.get(id) & flags::MESH == 0 {
            return Err(Error::InconsistentInput(format!(
                "tile {}: navtile requires a mesh",
                id
            )));
        }
        self.write_payload(id, TileFile::NavTile, &navtile.serialize())?;
        self.index.set_mask(id, flags::NAVTILE, MaskOp::Set);

        let mut meta = self.get_meta_node(id)?;
        meta.flags |= node_flags::NAVTILE;
        if let Some(range) = navtile.height_range() {
            meta.update_height_range(range.min, range.max);
        }
        self.pending_meta.insert(id, meta);
        self.changed = true;
        Ok(())
    }

    /// Store raw payload bytes captured by [`TileSet::get_tile_source`].
    pub fn set_tile_source(&mut self, id: TileId, source: &TileSource) -> Result<()> {
        self.check_writable()?;
        self.check_cancelled()?;
        if let Some(mesh) = &source.mesh {
            self.write_payload(id, TileFile::Mesh, mesh)?;
        }
        if let Some(atlas) = &source.atlas {
            self.write_payload(id, TileFile::Atlas, atlas)?;
        }
        if let Some(navtile) = &source.navtile {
            self.write_payload(id, TileFile::NavTile, navtile)?;
        }
        // meta and pyramid bookkeeping bits are rebuilt for this set
        self.index.set_mask(
            id,
            source.flags & !(flags::META | flags::CHILDREN),
            MaskOp::Set,
        );
        let mut meta = source.meta.clone();
        // child linkage is rebuilt for this set at flush
        meta.flags &= !node_flags::CHILDREN;
        self.pending_meta.insert(id, meta);
        self.changed = true;
        Ok(())
    }

    /// Record the glue source rank for a tile written earlier this session.
    pub(crate) fn set_tile_reference(&mut self, id: TileId, reference: u16) -> Result<()> {
        let mut meta = self.get_meta_node(id)?;
        meta.reference = reference;
        if reference > 0 {
            meta.flags |= node_flags::REFERENCE;
        }
        self.pending_meta.insert(id, meta);
        self.changed = true;
        Ok(())
    }

    fn write_payload(&self, id: TileId, file: TileFile, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        let mut sink = self.driver.output(id, file)?;
        sink.write_all(bytes)?;
        sink.close()
    }

    // ------------------------------------------------------------------
    // flush
    // ------------------------------------------------------------------

    /// Write metatiles, the tile index and the config; make everything
    /// durable. Must be called before close, otherwise the tile set stays
    /// unreadable.
    pub fn flush(&mut self) -> Result<()> {
        self.check_writable()?;
        self.build_metatiles()?;

        let index_blob = self.index.serialize();
        self.write_store_file(StoreFile::TileIndex, &index_blob)?;

        let registry_snapshot = serde_json::to_vec_pretty(&self.reference_frame)
            .map_err(|e| Error::Internal(e.to_string()))?;
        self.write_store_file(StoreFile::Registry, &registry_snapshot)?;

        self.properties.lod_range = self.index.lod_range();
        self.properties.driver_options = self.driver.options_json();
        let config_blob = config::config_bytes(&self.properties)?;
        self.write_store_file(StoreFile::Config, &config_blob)?;

        self.driver.flush()?;
        self.changed = false;
        info!(id = %self.properties.id, "flushed tile set");
        Ok(())
    }

    /// Assemble metatiles bottom-up from pending metanodes and the index.
    fn build_metatiles(&mut self) -> Result<()> {
        let range = self.index.lod_range();
        let (Some(min), Some(max)) = (range.min(), range.max()) else {
            return Ok(());
        };

        let mut carried: HashMap<TileId, MetaNode> = std::mem::take(&mut self.pending_meta);

        for lod in (min..=max).rev() {
            self.check_cancelled()?;

            // every node to store at this lod: pending writes plus material
            // tiles whose metanode still lives in an on-disk metatile
            let mut nodes: HashMap<TileId, MetaNode> = HashMap::new();
            let mut material: Vec<TileId> = Vec::new();
            self.index.traverse(lod, |id, value| {
                if value & (flags::CONTENT | flags::REFERENCE) != 0 {
                    material.push(id);
                }
            });
            for id in material {
                let node = match carried.remove(&id) {
                    Some(node) => node,
                    None => self.get_meta_node(id)?,
                };
                nodes.insert(id, node);
            }
            // carried parent nodes generated by the lod below
            let extra: Vec<TileId> = carried
                .keys()
                .filter(|id| id.lod == lod)
                .copied()
                .collect();
            for id in extra {
                if let Some(node) = carried.remove(&id) {
                    nodes.insert(id, node);
                }
            }

            if nodes.is_empty() {
                continue;
            }

            // group into metatiles and write them
            let mut tiles: HashMap<TileId, MetaTile> = HashMap::new();
            for (id, node) in &nodes {
                tiles
                    .entry(meta_id(*id, self.meta_binary_order))
                    .or_insert_with(|| MetaTile::new(*id, self.meta_binary_order))
                    .set(*id, node.clone());
            }
            let mut meta_ids: Vec<TileId> = tiles.keys().copied().collect();
            meta_ids.sort_unstable_by_key(|id| (id.y, id.x));
            for mid in meta_ids {
                let tile = &tiles[&mid];
                self.write_payload(mid, TileFile::Meta, &tile.serialize())?;
                self.index.set_mask(mid, flags::META, MaskOp::Set);
            }

            // fold into parents one level up
            if lod > min {
                for (id, node) in nodes {
                    let parent_id = id.parent();
                    carried
                        .entry(parent_id)
                        .or_default()
                        .absorb_child(id.child_slot(), &node);
                }
            }
        }
        Ok(())
    }

    fn write_store_file(&self, file: StoreFile, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        let mut sink = self.driver.output_file(file)?;
        sink.write_all(bytes)?;
        sink.close()
    }

    // ------------------------------------------------------------------
    // composition entry points
    // ------------------------------------------------------------------

    /// Bulk-insert every tile of `src`, optionally restricted to a LOD
    /// range. Raw bytes are copied without re-encoding; on overlap the
    /// pasted tile wins.
    pub fn paste(&mut self, src: &TileSet, lod_range: Option<LodRange>) -> Result<()> {
        crate::compose::paste_into(self, src, lod_range)
    }
}

/// Texture resolution of a tile: SRS units per texel, worst submesh wins.
fn texel_size(node: &NodeInfo, mesh: &Mesh, atlas: Option<&Atlas>) -> f32 {
    let Some(atlas) = atlas else {
        return 0.0;
    };
    let mut worst = 0.0f64;
    for i in 0..mesh.submeshes.len() {
        if let Ok((w, h)) = atlas.image_size(i) {
            let px = f64::from(w.max(h).max(1));
            let units = node.extents().width().max(node.extents().height());
            worst = worst.max(units / px);
        }
    }
    worst as f32
}

/// Clone `src` into a fresh tile set at `path`.
pub fn clone_tile_set(
    path: &Path,
    src: &TileSet,
    registry: &Registry,
    mode: CreateMode,
    lod_range: Option<LodRange>,
) -> Result<TileSet> {
    let mut properties = src.properties().clone();
    properties.driver_options = serde_json::Value::Null;
    let mut dst = TileSet::create(path, properties, registry, mode)?;
    dst.paste(src, lod_range)?;
    dst.flush()?;
    Ok(dst)
}

/// Paste several tile sets into `dst` in order (last wins) and flush.
pub fn paste_tile_sets(
    dst: &mut TileSet,
    srcs: &[&TileSet],
    token: Option<CancellationToken>,
) -> Result<()> {
    if let Some(token) = token {
        dst.watch(token);
    }
    for src in srcs {
        dst.paste(src, None)?;
    }
    dst.flush()
}

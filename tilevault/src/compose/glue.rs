//! Priority merge of overlapping tile sets.
//!
//! Sources arrive in ascending priority. For every tile present in more
//! than one source the highest-priority tile wins at the surface; submeshes
//! of lower-priority tiles are kept only where the accumulated coverage is
//! still clear. The destination is assembled in a staging directory and
//! renamed into place on success, so a failed or cancelled glue leaves
//! nothing visible.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::atlas::Atlas;
use crate::error::{Error, Result};
use crate::mesh::{rasterize_triangle, GridMapping, Mesh, SubMesh, COVERAGE_SIZE};
use crate::navtile::NavTile;
use crate::qtree::RasterMask;
use crate::refframe::{NodeInfo, Registry};
use crate::tileid::{LodRange, TileId};
use crate::tileindex::flags;
use crate::tileset::{CreateMode, Tile, TileSet, TileSetProperties};

/// Glue parameters.
#[derive(Debug, Clone)]
pub struct GlueOptions {
    /// Id of the produced tile set
    pub id: String,
    /// Atlas recompression quality; reserved, composition currently copies
    /// encoded images untouched
    pub texture_quality: u8,
}

impl GlueOptions {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            texture_quality: 85,
        }
    }
}

/// How a glue run ended.
pub enum GlueOutcome {
    /// The glued set, committed at the requested path
    Created(TileSet),
    /// Cancellation observed; nothing was made visible
    Cancelled,
}

/// Glue `sets` (ascending priority) into a new tile set at `path`.
pub fn create_glue(
    path: &Path,
    sets: &[&TileSet],
    registry: &Registry,
    options: &GlueOptions,
    token: Option<CancellationToken>,
) -> Result<GlueOutcome> {
    if sets.is_empty() {
        return Err(Error::InconsistentInput("glue of zero tile sets".to_string()));
    }
    let frame_id = sets[0].properties().reference_frame.clone();
    for set in sets {
        if set.properties().reference_frame != frame_id {
            return Err(Error::InconsistentInput(format!(
                "glue sources span reference frames {} and {}",
                frame_id,
                set.properties().reference_frame
            )));
        }
    }

    let staging = staging_path(path);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let result = build_glue(&staging, sets, registry, options, token.as_ref());
    match result {
        Ok(true) => {
            if path.exists() {
                return Err(Error::AlreadyExists(path.to_path_buf()));
            }
            fs::rename(&staging, path)?;
            info!(path = %path.display(), sources = sets.len(), "committed glue");
            let set = TileSet::open(path, registry, crate::driver::Mode::ReadOnly)?;
            Ok(GlueOutcome::Created(set))
        }
        Ok(false) => {
            let _ = fs::remove_dir_all(&staging);
            Ok(GlueOutcome::Cancelled)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "glue".to_string());
    path.with_file_name(format!(".{}.glue-staging", name))
}

/// Assemble the glue into `staging`. Returns false when cancelled.
fn build_glue(
    staging: &Path,
    sets: &[&TileSet],
    registry: &Registry,
    options: &GlueOptions,
    token: Option<&CancellationToken>,
) -> Result<bool> {
    let mut properties = TileSetProperties::new(&options.id, &sets[0].properties().reference_frame);
    for set in sets {
        properties.credits.extend(set.properties().credits.iter());
        properties
            .bound_layers
            .extend(set.properties().bound_layers.iter());
    }
    let mut dst = TileSet::create(staging, properties, registry, CreateMode::FailIfExists)?;
    let frame = dst.reference_frame().clone();

    let range = sets
        .iter()
        .fold(LodRange::Empty, |acc, s| acc.union(&s.lod_range()));

    for lod in range.iter() {
        // union of content tiles at this lod, row-major
        let mut ids: BTreeSet<(u32, u32)> = BTreeSet::new();
        for set in sets {
            set.tile_index().traverse(lod, |id, value| {
                if value & flags::CONTENT != 0 {
                    ids.insert((id.y, id.x));
                }
            });
        }

        for (y, x) in ids {
            if let Some(token) = token {
                if token.is_cancelled() {
                    debug!("glue cancelled at lod {}", lod);
                    return Ok(false);
                }
            }
            let id = TileId::new(lod, x, y);
            glue_tile(&mut dst, sets, &frame, id)?;
        }
    }

    dst.flush()?;
    Ok(true)
}

/// Merge one tile from every source holding it.
fn glue_tile(
    dst: &mut TileSet,
    sets: &[&TileSet],
    frame: &crate::refframe::ReferenceFrame,
    id: TileId,
) -> Result<()> {
    // contributing source ranks, highest priority first
    let contributors: Vec<usize> = (0..sets.len())
        .rev()
        .filter(|&rank| sets[rank].tile_index().get(id) & flags::CONTENT != 0)
        .collect();
    let multi = contributors.len() > 1;
    let top = contributors[0];

    let top_mesh = sets[top].get_mesh(id)?;
    if !multi || top_mesh.coverage.is_full() {
        // the winner owns the whole surface; copy raw bytes
        let source = sets[top].get_tile_source(id)?;
        dst.set_tile_source(id, &source)?;
        if multi {
            dst.set_tile_reference(id, (top + 1) as u16)?;
        }
        return Ok(());
    }

    // composite: winner's submeshes plus lower-priority submeshes wherever
    // the accumulated coverage is still clear
    let node = NodeInfo::new(frame, id);
    let mapping = GridMapping::new(node.extents(), COVERAGE_SIZE, COVERAGE_SIZE);

    let mut mesh = Mesh::new();
    let mut atlas = Atlas::new();
    let mut navtile: Option<NavTile> = None;
    let mut credits: BTreeSet<u16> = BTreeSet::new();
    let mut covered = top_mesh.coverage.clone();

    let top_atlas = read_atlas(sets[top], id, &top_mesh)?;
    for (i, sm) in top_mesh.submeshes.iter().enumerate() {
        mesh.submeshes.push(sm.clone());
        if let Some(a) = &top_atlas {
            push_image(&mut atlas, a, i)?;
        }
    }
    collect_tile_extras(sets[top], id, &mut navtile, &mut credits)?;

    for &rank in &contributors[1..] {
        if covered.is_full() {
            break;
        }
        let lower_mesh = sets[rank].get_mesh(id)?;
        let lower_atlas = read_atlas(sets[rank], id, &lower_mesh)?;
        let mut used_any = false;

        for (i, sm) in lower_mesh.submeshes.iter().enumerate() {
            let contribution = submesh_coverage(sm, &mapping);
            if contribution.subtract(&covered).is_empty() {
                continue;
            }
            covered = covered.union(&contribution);
            mesh.submeshes.push(sm.clone());
            if let Some(a) = &lower_atlas {
                push_image(&mut atlas, a, i)?;
            }
            used_any = true;
        }
        if used_any {
            collect_tile_extras(sets[rank], id, &mut navtile, &mut credits)?;
        }
    }

    mesh.coverage = covered;
    let tile = Tile {
        mesh: Some(mesh),
        atlas: if atlas.is_empty() { None } else { Some(atlas) },
        navtile,
        credits,
        alien: false,
    };
    dst.set_tile(id, &tile, Some(&node))?;
    dst.set_tile_reference(id, (top + 1) as u16)?;
    Ok(())
}

fn read_atlas(set: &TileSet, id: TileId, mesh: &Mesh) -> Result<Option<Atlas>> {
    if mesh.submeshes.is_empty() {
        return Ok(None);
    }
    match set.get_atlas(id) {
        Ok(atlas) => Ok(Some(atlas)),
        Err(Error::NoSuchFile(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn push_image(atlas: &mut Atlas, source: &Atlas, index: usize) -> Result<()> {
    let image = source
        .image(index)
        .ok_or_else(|| Error::InconsistentInput(format!("atlas image {} missing", index)))?;
    atlas.push(image.to_vec());
    Ok(())
}

fn collect_tile_extras(
    set: &TileSet,
    id: TileId,
    navtile: &mut Option<NavTile>,
    credits: &mut BTreeSet<u16>,
) -> Result<()> {
    if navtile.is_none() {
        match set.get_nav_tile(id) {
            Ok(nt) => *navtile = Some(nt),
            Err(Error::NoSuchFile(_)) => {}
            Err(e) => return Err(e),
        }
    }
    match set.get_meta_node(id) {
        Ok(node) => credits.extend(node.credits.iter()),
        Err(Error::NoSuchFile(_)) => {}
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Pixels of the coverage grid touched by a submesh's triangles.
fn submesh_coverage(sm: &SubMesh, mapping: &GridMapping) -> RasterMask {
    let mut mask = RasterMask::empty(COVERAGE_SIZE);
    for face in &sm.faces {
        let tri = [
            sm.vertices[face[0] as usize],
            sm.vertices[face[1] as usize],
            sm.vertices[face[2] as usize],
        ];
        rasterize_triangle(&tri, mapping, &mut |x, y, _| mask.set(x, y, true));
    }
    mask
}

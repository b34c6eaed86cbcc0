//! LOD-ordered parallel tile generation.
//!
//! The encoder walks the reference-frame pyramid level by level, calling a
//! user [`TileGenerator`] exactly once per reachable tile. Tiles of one LOD
//! are generated in parallel on a fixed worker pool; their results are
//! visible to their children on the next level, so the parent→child
//! ordering contract holds while sibling subtrees run concurrently. A
//! bounded write queue feeds a single writer that applies tiles to the
//! tile set in deterministic (row-major) order, so a deterministic
//! generator always yields byte-identical output.
//!
//! Cancellation is cooperative: the token is polled at tile boundaries;
//! once observed, remaining tiles report no data, the traversal stops
//! queueing, in-flight writes drain and the partial set is flushed before
//! the cancelled outcome is surfaced.

mod heightmap;


pub use heightmap::{BestPosition, HeightMap, HeightMapAccumulator};

use std::sync::mpsc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::refframe::NodeInfo;
use crate::tileid::{Child, Extents2, LodRange, TileId};
use crate::tileset::{Tile, TileSet};

/// Outcome of one `generate` call.
#[derive(Debug, Clone, Default)]
pub enum TileResult {
    /// Tile content to store
    Data(Tile),
    /// No tile here, but children may still have data
    #[default]
    NoDataYet,
    /// No tile here nor below; prunes the subtree
    NoData,
}

impl TileResult {
    pub fn has_data(&self) -> bool {
        matches!(self, TileResult::Data(_))
    }
}

/// User-supplied tile producer driven by the encoder.
pub trait TileGenerator: Send + Sync {
    /// Produce the tile at `id`. Called exactly once per reachable tile;
    /// `parent` is the result generated for the tile's parent (`NoDataYet`
    /// at the root).
    fn generate(&self, id: TileId, node: &NodeInfo, parent: &TileResult) -> Result<TileResult>;

    /// Runs single-threaded after traversal, before the final flush. The
    /// place to emit aggregated artefacts such as the navtile pyramid.
    fn finish(&self, ts: &mut TileSet) -> Result<()> {
        let _ = ts;
        Ok(())
    }
}

/// Traversal bounds.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    /// Generate tiles only inside this LOD span; traversal still descends
    /// through coarser LODs to reach it.
    pub lod_range: LodRange,
    /// Skip subtrees entirely outside these extents (in subtree SRS)
    pub extents: Option<Extents2>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Cancelled,
}

/// Tile-generation engine bound to an output tile set.
pub struct Encoder {
    tileset: TileSet,
    constraints: Constraints,
    workers: usize,
    queue_depth: usize,
    token: CancellationToken,
}

impl Encoder {
    /// Encoder writing into `tileset` (opened read-write).
    pub fn new(tileset: TileSet) -> Self {
        Self {
            tileset,
            constraints: Constraints::default(),
            workers: 4,
            queue_depth: 64,
            token: CancellationToken::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Fixed worker-pool size. The same count and a deterministic generator
    /// reproduce identical output bytes.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run the traversal, then `finish`, then flush.
    ///
    /// Returns the tile set and whether the run completed or observed its
    /// cancellation token.
    pub fn run(mut self, generator: &dyn TileGenerator) -> Result<(TileSet, Outcome)> {
        let frame = self.tileset.reference_frame().clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let token = self.token.clone();
        let constraints = self.constraints.clone();
        let root = frame.root().id;
        let max_lod = constraints.lod_range.max().unwrap_or(u8::MAX);

        info!(
            root = %root,
            workers = self.workers,
            "encoding tile set {}",
            self.tileset.id()
        );

        let (sender, receiver) = mpsc::sync_channel::<(TileId, NodeInfo, Tile)>(self.queue_depth);
        let tileset = &mut self.tileset;
        let mut write_error: Option<Error> = None;
        let mut traverse_result: Result<bool> = Ok(false);

        std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> Result<()> {
                // drains whatever the traversal managed to queue; on cancel
                // the traversal side stops producing, this side finishes
                // the in-flight tiles
                while let Ok((id, node, tile)) = receiver.recv() {
                    tileset.set_tile(id, &tile, Some(&node))?;
                }
                Ok(())
            });

            traverse_result = traverse(
                &pool, generator, &frame, &constraints, &token, &sender, root, max_lod,
            );
            drop(sender);

            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => write_error = Some(e),
                Err(_) => write_error = Some(Error::Internal("writer thread panicked".into())),
            }
        });

        if let Some(e) = write_error {
            return Err(e);
        }
        let cancelled = traverse_result?;

        if cancelled {
            debug!("encoder cancelled; flushing partial tile set");
            self.tileset.flush()?;
            return Ok((self.tileset, Outcome::Cancelled));
        }

        generator.finish(&mut self.tileset)?;
        self.tileset.flush()?;
        Ok((self.tileset, Outcome::Finished))
    }
}

/// Level-order traversal. Returns whether cancellation was observed.
#[allow(clippy::too_many_arguments)]
fn traverse(
    pool: &rayon::ThreadPool,
    generator: &dyn TileGenerator,
    frame: &crate::refframe::ReferenceFrame,
    constraints: &Constraints,
    token: &CancellationToken,
    sender: &mpsc::SyncSender<(TileId, NodeInfo, Tile)>,
    root: TileId,
    max_lod: u8,
) -> Result<bool> {
    use rayon::prelude::*;
    use std::sync::Arc;

    let min_lod = constraints.lod_range.min().unwrap_or(0);
    let mut frontier: Vec<(TileId, Arc<TileResult>)> =
        vec![(root, Arc::new(TileResult::NoDataYet))];

    while !frontier.is_empty() {
        if token.is_cancelled() {
            return Ok(true);
        }

        let produced: Vec<(TileId, NodeInfo, Result<TileResult>)> = pool.install(|| {
            frontier
                .par_iter()
                .map(|(id, parent)| {
                    let node = NodeInfo::new(frame, *id);
                    let result = generate_one(
                        generator,
                        &node,
                        *id,
                        parent.as_ref(),
                        constraints,
                        token,
                        min_lod,
                    );
                    (*id, node, result)
                })
                .collect()
        });

        let mut produced: Vec<(TileId, NodeInfo, TileResult)> = produced
            .into_iter()
            .map(|(id, node, result)| result.map(|r| (id, node, r)))
            .collect::<Result<Vec<_>>>()?;
        produced.sort_unstable_by_key(|(id, _, _)| (id.y, id.x));

        // apply writes in deterministic order, then build the next level
        let mut next: Vec<(TileId, Arc<TileResult>)> = Vec::new();
        for (id, node, result) in produced.drain(..) {
            if let TileResult::Data(tile) = &result {
                sender
                    .send((id, node.clone(), tile.clone()))
                    .map_err(|_| Error::Internal("write queue closed early".into()))?;
            }
            if matches!(result, TileResult::NoData) || id.lod >= max_lod {
                continue;
            }
            let shared = Arc::new(result);
            for slot in Child::ALL {
                let child = id.child(slot);
                if child.valid() {
                    next.push((child, shared.clone()));
                }
            }
        }
        frontier = next;
    }
    Ok(false)
}

fn generate_one(
    generator: &dyn TileGenerator,
    node: &NodeInfo,
    id: TileId,
    parent: &TileResult,
    constraints: &Constraints,
    token: &CancellationToken,
    min_lod: u8,
) -> Result<TileResult> {
    if token.is_cancelled() {
        return Ok(TileResult::NoData);
    }
    if !node.valid() {
        return Ok(TileResult::NoData);
    }
    if let Some(clip) = &constraints.extents {
        if !clip.intersects(node.extents()) {
            return Ok(TileResult::NoData);
        }
    }
    if id.lod < min_lod {
        // above the generated range; keep descending
        return Ok(TileResult::NoDataYet);
    }
    generator.generate(id, node, parent)
}

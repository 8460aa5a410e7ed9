//! Hierarchical tile rendering
//!
//! The [`Renderer`] owns a compiled tape, a subtape pool, and the output
//! images.  Each call to [`Renderer::run`] walks the tile hierarchy stage by
//! stage (64 → 16 → 4 voxel tiles in 3D, 64 → 8 pixel tiles in 2D): every
//! stage evaluates its candidate tiles in parallel, prunes each surviving
//! tile's tape down to the clauses that still matter, and subdivides the
//! survivors into the next stage.  After the final stage, surviving tiles
//! are rendered pixel-by-pixel, and (in 3D) surface normals are computed
//! from the most deeply pruned tapes.
use crate::{
    context::{Context, Node},
    render::{
        tile_eval::{
            eval_tile, splat_filled, StageCtx, TileScratch, TileStatus,
        },
        tiles::TileStage,
        view::Mapping,
    },
    subtape::SubtapePool,
    tape::{build_tape, Tape},
    Error,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

mod config;
mod image;
mod normal;
mod pixel;
mod tile_eval;
mod tiles;
mod view;
mod walk;

pub use config::{Dimension, RenderConfig, TileSizes};
pub use image::{DepthImage, SurfaceMode};
pub use view::View;

/// Counters describing a single render
///
/// The per-stage vectors have one entry per stage that actually executed; a
/// render that classifies the whole image at stage 0 reports a single entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenderStats {
    /// Candidate tiles per stage
    pub tiles_evaluated: Vec<usize>,

    /// Tiles classified Ambiguous per stage (the next stage's queue size)
    pub active_tiles: Vec<usize>,

    /// Ambiguous tiles whose specialized tape has no min/max left
    pub terminal_tiles: Vec<usize>,

    /// Tiles classified Filled per stage
    pub filled_tiles: Vec<usize>,

    /// Tiles skipped by the depth mask per stage (3D only)
    pub masked_tiles: Vec<usize>,

    /// Subtape chunks claimed from the pool
    pub subtape_chunks: usize,

    /// Tiles that kept their parent tape because the pool was exhausted
    pub specialization_fallbacks: usize,
}

/// Renderer for a single compiled shape
///
/// The tape, subtape pool, and images are owned for the renderer's lifetime;
/// [`run`](Self::run) resets the pool and images on entry, so handles from a
/// previous render are never observable.
pub struct Renderer {
    tape: Tape,
    config: RenderConfig,
    image_size: usize,
    pool: SubtapePool,
    depth: DepthImage,
    norm: Vec<u32>,
    threads: rayon::ThreadPool,
    stats: RenderStats,
    exhaustion_logged: bool,
}

impl Renderer {
    /// Compiles the given expression and prepares render resources
    ///
    /// Fails if the expression uses an opcode outside the supported set, if
    /// it needs more than 255 value slots, or if the image size does not
    /// divide evenly into top-level tiles.
    pub fn build(
        ctx: &Context,
        root: Node,
        image_size: usize,
        config: RenderConfig,
    ) -> Result<Self, Error> {
        config.validate(image_size)?;
        let tape = build_tape(ctx, root)?;
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()?;
        let norm = match config.dimension {
            Dimension::Two => vec![],
            Dimension::Three => vec![0; image_size * image_size],
        };
        Ok(Self {
            tape,
            depth: DepthImage::new(image_size),
            norm,
            pool: SubtapePool::new(config.subtape_pool_size),
            image_size,
            config,
            threads,
            stats: RenderStats::default(),
            exhaustion_logged: false,
        })
    }

    /// Returns the image size in pixels per side
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Returns counters for the most recent render
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Reads the depth (3D) or fill mask (2D) value at a pixel
    pub fn height_at(&self, x: u32, y: u32) -> u32 {
        self.depth.get(x, y)
    }

    /// Copies the depth image into a plain row-major vector
    pub fn depth_snapshot(&self) -> Vec<u32> {
        self.depth.snapshot()
    }

    /// Returns the packed normal image (empty for 2D renders)
    pub fn normals(&self) -> &[u32] {
        &self.norm
    }

    /// Renders the shape under the given view
    ///
    /// Writes the internal depth image and, for 3D renders, the normal
    /// image.  Rendering the same view twice produces identical output.
    pub fn run(&mut self, view: &View) {
        self.pool.reset();
        self.depth.reset();
        self.norm.fill(0);
        self.stats = RenderStats::default();

        let dim = self.config.dimension;
        let two_d = dim == Dimension::Two;
        let mapping = Mapping::new(view, self.image_size, two_d);
        let fallbacks = AtomicUsize::new(0);

        // A tape with no min/max clauses cannot be specialized any further
        let root_terminal = self.tape.choice_count() == 0;

        let mut stages = vec![TileStage::whole_image(
            self.config.tile_sizes[0],
            self.image_size,
            dim,
            root_terminal,
        )];

        for k in 0..self.config.tile_sizes.len() {
            let stage = stages.last().unwrap();
            let sctx = StageCtx {
                tape: &self.tape,
                pool: &self.pool,
                depth: &self.depth,
                mapping,
                dim,
                fallbacks: &fallbacks,
            };
            let active = AtomicUsize::new(0);
            let statuses: Vec<TileStatus> = self.threads.install(|| {
                (0..stage.len())
                    .into_par_iter()
                    .map_init(
                        || TileScratch::new(&self.tape),
                        |scratch, i| {
                            let coords = stage.unpack(stage.pos[i]);
                            let parent =
                                stage.tape[i].load(Ordering::Relaxed);
                            let parent_terminal =
                                stage.terminal[i].load(Ordering::Relaxed);
                            let (status, handle, terminal) = eval_tile(
                                &sctx,
                                scratch,
                                coords,
                                stage.tile_size,
                                parent,
                                parent_terminal,
                            );
                            if status == TileStatus::Ambiguous {
                                stage.tape[i]
                                    .store(handle, Ordering::Relaxed);
                                stage.terminal[i]
                                    .store(terminal, Ordering::Relaxed);
                                let slot =
                                    active.fetch_add(1, Ordering::Relaxed);
                                stage.next[i]
                                    .store(slot as i32, Ordering::Relaxed);
                            }
                            status
                        },
                    )
                    .collect()
            });

            // Filled tiles land in the depth image only after the stage
            // barrier, so occlusion tests never race with splats and
            // classification is reproducible
            self.threads.install(|| {
                statuses
                    .par_iter()
                    .enumerate()
                    .filter(|(_, s)| **s == TileStatus::Filled)
                    .for_each(|(i, _)| {
                        let coords = stage.unpack(stage.pos[i]);
                        splat_filled(&sctx, coords, stage.tile_size);
                    })
            });

            let active = active.load(Ordering::Relaxed);
            let count =
                |s| statuses.iter().filter(|&&v| v == s).count();
            let terminal_count = (0..stage.len())
                .filter(|&i| {
                    statuses[i] == TileStatus::Ambiguous
                        && stage.terminal[i].load(Ordering::Relaxed)
                })
                .count();
            self.stats.tiles_evaluated.push(stage.len());
            self.stats.active_tiles.push(active);
            self.stats.terminal_tiles.push(terminal_count);
            self.stats.filled_tiles.push(count(TileStatus::Filled));
            self.stats.masked_tiles.push(count(TileStatus::Masked));
            log::trace!(
                "stage {k} ({} px tiles): {} candidates, {} active, \
                 {} filled",
                stage.tile_size,
                stage.len(),
                active,
                self.stats.filled_tiles[k],
            );

            if active == 0 {
                break;
            }
            if let Some(next_size) = self.config.tile_sizes.get(k + 1) {
                let child = stage.subdivide(next_size, active);
                stages.push(child);
            }
        }

        // Per-pixel pass over the finest surviving tiles
        let last = stages.last().unwrap();
        let sctx = StageCtx {
            tape: &self.tape,
            pool: &self.pool,
            depth: &self.depth,
            mapping,
            dim,
            fallbacks: &fallbacks,
        };
        self.threads.install(|| {
            (0..last.len()).into_par_iter().for_each_init(
                || TileScratch::new(&self.tape),
                |scratch, i| {
                    if last.next[i].load(Ordering::Relaxed) < 0 {
                        return;
                    }
                    let coords = last.unpack(last.pos[i]);
                    let handle = last.tape[i].load(Ordering::Relaxed);
                    match dim {
                        Dimension::Two => pixel::draw_tile_2d(
                            &sctx,
                            scratch,
                            coords,
                            last.tile_size,
                            handle,
                        ),
                        Dimension::Three => pixel::draw_tile_3d(
                            &sctx,
                            scratch,
                            coords,
                            last.tile_size,
                            handle,
                        ),
                    }
                },
            )
        });

        if dim == Dimension::Three {
            let depth = self.depth.snapshot();
            let tape = &self.tape;
            let pool = &self.pool;
            let norm = &mut self.norm;
            let size = self.image_size;
            self.threads.install(|| {
                normal::draw_normals(
                    tape, pool, &stages, &depth, norm, &mapping, size,
                )
            });
        }

        self.stats.subtape_chunks = self.pool.claimed();
        self.stats.specialization_fallbacks =
            fallbacks.load(Ordering::Relaxed);
        if self.stats.specialization_fallbacks > 0 && !self.exhaustion_logged
        {
            self.exhaustion_logged = true;
            log::warn!(
                "subtape pool exhausted; {} tiles fell back to their \
                 parent tapes",
                self.stats.specialization_fallbacks,
            );
        }
    }

    /// Copies the rendered output into a square host buffer
    ///
    /// `target` must hold `target_size * target_size` pixels; a size
    /// mismatch with the render is resolved by nearest sampling.  In append
    /// mode, destination pixels are preserved wherever the renderer has no
    /// coverage.  [`SurfaceMode::Normal`] writes zeros for 2D renders.
    pub fn copy_to(
        &self,
        target: &mut [u32],
        target_size: usize,
        append: bool,
        mode: SurfaceMode,
    ) {
        assert_eq!(target.len(), target_size * target_size);
        for ty in 0..target_size {
            let sy = (ty * self.image_size / target_size) as u32;
            for tx in 0..target_size {
                let sx = (tx * self.image_size / target_size) as u32;
                let d = self.depth.get(sx, sy);
                if append && d == 0 {
                    continue;
                }
                target[ty * target_size + tx] = match mode {
                    SurfaceMode::Depth => d,
                    SurfaceMode::Normal => self
                        .norm
                        .get(sy as usize * self.image_size + sx as usize)
                        .copied()
                        .unwrap_or(0),
                };
            }
        }
    }
}

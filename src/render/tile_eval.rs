//! Per-tile interval evaluation and tape specialization
//!
//! Each worker evaluates one tile: it maps the tile's bounds into world
//! space, runs the parent tape under interval arithmetic while recording a
//! choice per min/max clause, classifies the tile, and (for ambiguous tiles)
//! walks the parent tape *backwards* to write a pruned subtape containing
//! only the clauses that can still affect this tile.
use crate::render::config::Dimension;
use crate::render::image::DepthImage;
use crate::render::view::Mapping;
use crate::subtape::{
    SubtapeIter, SubtapePool, SubtapeRevIter, SubtapeWriter, NO_SUBTAPE,
};
use crate::tape::{self, Clause, SlotArray, Tape};
use crate::types::{Choice, Float2, Interval};
use arrayvec::ArrayVec;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Maximum number of min/max clauses recorded per tile
///
/// Exceeding this is an implementation bug, not a data-dependent condition:
/// the root tape's choice count bounds every subtape's.
pub(crate) const MAX_CHOICES: usize = 2048;

/// Classification of one evaluated tile
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TileStatus {
    /// The interval result was strictly positive
    Empty,
    /// Skipped: the depth mask already covers this tile (3D only)
    Masked,
    /// The interval result was strictly negative
    Filled,
    /// The tile straddles the surface and survives to the next stage
    Ambiguous,
}

/// Per-worker scratch, reused across tiles to avoid allocation
pub(crate) struct TileScratch {
    slots_i: Vec<Interval>,
    pub slots_f: Vec<f32>,
    pub slots_p: Vec<Float2>,
    choices: ArrayVec<Choice, MAX_CHOICES>,
    active: Vec<bool>,
}

impl TileScratch {
    pub fn new(tape: &Tape) -> Self {
        let n = tape.slot_count();
        Self {
            slots_i: vec![Interval::from(f32::NAN); n],
            slots_f: vec![f32::NAN; n],
            slots_p: vec![Float2::from(f32::NAN); n],
            choices: ArrayVec::new(),
            active: vec![false; n],
        }
    }
}

/// Shared, read-only state for one stage's worth of tile workers
pub(crate) struct StageCtx<'a> {
    pub tape: &'a Tape,
    pub pool: &'a SubtapePool,
    pub depth: &'a DepthImage,
    pub mapping: Mapping,
    pub dim: Dimension,

    /// Count of tiles that fell back to their parent tape because the
    /// subtape pool was exhausted
    pub fallbacks: &'a AtomicUsize,
}

/// Evaluates a single tile, returning its status, subtape handle, and
/// terminal flag
pub(crate) fn eval_tile(
    ctx: &StageCtx,
    scratch: &mut TileScratch,
    coords: [u32; 3],
    tile_size: usize,
    parent_tape: u32,
    parent_terminal: bool,
) -> (TileStatus, u32, bool) {
    let s = tile_size as u32;
    let lo = [coords[0] * s, coords[1] * s, coords[2] * s];
    let hi = [lo[0] + s, lo[1] + s, lo[2] + s];

    // Occlusion: if every pixel under this tile is already at or above the
    // tile's top voxel, nothing here can contribute
    if ctx.dim == Dimension::Three && occluded(ctx.depth, lo, hi) {
        return (TileStatus::Masked, parent_tape, parent_terminal);
    }

    let [x, y, z] = ctx.mapping.tile_box(lo, hi);
    scratch.choices.clear();
    let (out, root_slot, end) =
        eval_interval(ctx, scratch, parent_tape, x, y, z);

    if out.upper() < 0.0 {
        return (TileStatus::Filled, parent_tape, parent_terminal);
    } else if out.lower() > 0.0 {
        return (TileStatus::Empty, parent_tape, parent_terminal);
    }

    // A terminal tape has no choices to specialize on, so children reuse it
    // verbatim
    if parent_terminal {
        return (TileStatus::Ambiguous, parent_tape, true);
    }

    match specialize(ctx, scratch, root_slot, end) {
        Some((handle, terminal)) => {
            (TileStatus::Ambiguous, handle, terminal)
        }
        None => {
            // Pool exhausted: render from the parent tape, only more slowly
            ctx.fallbacks.fetch_add(1, Ordering::Relaxed);
            (TileStatus::Ambiguous, parent_tape, false)
        }
    }
}

/// Checks whether the depth mask already dominates the tile's top voxel
fn occluded(depth: &DepthImage, lo: [u32; 3], hi: [u32; 3]) -> bool {
    let zmax = hi[2] - 1;
    for y in lo[1]..hi[1] {
        for x in lo[0]..hi[0] {
            if depth.get(x, y) < zmax {
                return false;
            }
        }
    }
    true
}

/// Pushes a filled tile's footprint into the depth image
///
/// Runs after the stage barrier, never concurrently with that stage's
/// occlusion tests, so classification is independent of worker scheduling.
/// The accumulated maximum doubles as the level's filled mask, the occlusion
/// mask for later stages, and the final composite.
pub(crate) fn splat_filled(
    ctx: &StageCtx,
    coords: [u32; 3],
    tile_size: usize,
) {
    let s = tile_size as u32;
    let lo = [coords[0] * s, coords[1] * s];
    let v = match ctx.dim {
        Dimension::Two => u32::MAX,
        Dimension::Three => (coords[2] + 1) * s - 1,
    };
    for y in lo[1]..lo[1] + s {
        for x in lo[0]..lo[0] + s {
            ctx.depth.max(x, y, v);
        }
    }
}

/// Runs the parent tape over the given intervals, recording choices
///
/// Returns the root interval, the root slot, and (for chain parents) the
/// position of the terminating clause, which seeds the backward
/// specialization walk.
fn eval_interval(
    ctx: &StageCtx,
    scratch: &mut TileScratch,
    parent_tape: u32,
    x: Interval,
    y: Interval,
    z: Interval,
) -> (Interval, u8, Option<(u32, usize)>) {
    let mut v = SlotArray(&mut scratch.slots_i);
    let [ax, ay, az] = ctx.tape.axes();
    if ax != tape::SLOT_NONE {
        v[ax] = x;
    }
    if ay != tape::SLOT_NONE {
        v[ay] = y;
    }
    if az != tape::SLOT_NONE {
        v[az] = z;
    }
    if parent_tape == NO_SUBTAPE {
        for &c in ctx.tape.clauses() {
            match c {
                Clause::End(root) => return (v[root], root, None),
                Clause::Jump(..) => unreachable!("jump in root tape"),
                c => record(&mut scratch.choices, tape::step_interval(c, &mut v)),
            }
        }
    } else {
        let mut it = SubtapeIter::new(ctx.pool, parent_tape);
        while let Some(c) = it.next() {
            match c {
                Clause::End(root) => {
                    return (v[root], root, Some(it.last_position()))
                }
                c => record(&mut scratch.choices, tape::step_interval(c, &mut v)),
            }
        }
    }
    unreachable!("tape must be terminated by an End clause")
}

#[inline]
fn record(
    choices: &mut ArrayVec<Choice, MAX_CHOICES>,
    choice: Option<Choice>,
) {
    if let Some(c) = choice {
        choices.try_push(c).expect("choice buffer overflow");
    }
}

/// Writes a specialized subtape for an ambiguous tile
///
/// Walks the parent tape backwards with an active-slot bit vector, consuming
/// the recorded choices in reverse.  Returns `None` if the pool is
/// exhausted, in which case the caller falls back to the parent tape.
fn specialize(
    ctx: &StageCtx,
    scratch: &mut TileScratch,
    root_slot: u8,
    end: Option<(u32, usize)>,
) -> Option<(u32, bool)> {
    let mut w = SubtapeWriter::new(ctx.pool)?;
    w.push(Clause::End(root_slot))?;

    scratch.active.fill(false);
    scratch.active[root_slot as usize] = true;

    let out = match end {
        None => {
            let n = ctx.tape.len();
            spec_walk(
                ctx.tape.clauses()[..n - 1].iter().rev().copied(),
                scratch,
                &mut w,
            )
        }
        Some((chunk, pos)) => spec_walk(
            SubtapeRevIter::new(ctx.pool, chunk, pos),
            scratch,
            &mut w,
        ),
    }?;
    Some((w.finish(), out))
}

/// The backward pruning walk itself; returns the new tape's terminal flag
fn spec_walk(
    it: impl Iterator<Item = Clause>,
    scratch: &mut TileScratch,
    w: &mut SubtapeWriter,
) -> Option<bool> {
    let active = &mut scratch.active;
    let mut cursor = scratch.choices.len();
    let mut terminal = true;
    for c in it {
        match c {
            Clause::MinRegReg(out, a, b) | Clause::MaxRegReg(out, a, b) => {
                cursor = cursor.checked_sub(1).expect("choice bit underflow");
                let choice = scratch.choices[cursor];
                if !std::mem::replace(&mut active[out as usize], false) {
                    continue;
                }
                match choice {
                    Choice::Left => {
                        if out != a {
                            w.push(Clause::CopyReg(out, a))?;
                        }
                        active[a as usize] = true;
                    }
                    Choice::Right => {
                        if out != b {
                            w.push(Clause::CopyReg(out, b))?;
                        }
                        active[b as usize] = true;
                    }
                    Choice::Both => {
                        w.push(c)?;
                        active[a as usize] = true;
                        active[b as usize] = true;
                        terminal = false;
                    }
                }
            }
            Clause::MinRegImm(out, a, imm)
            | Clause::MaxRegImm(out, a, imm) => {
                cursor = cursor.checked_sub(1).expect("choice bit underflow");
                let choice = scratch.choices[cursor];
                if !std::mem::replace(&mut active[out as usize], false) {
                    continue;
                }
                match choice {
                    Choice::Left => {
                        if out != a {
                            w.push(Clause::CopyReg(out, a))?;
                        }
                        active[a as usize] = true;
                    }
                    Choice::Right => {
                        w.push(Clause::CopyImm(out, imm))?;
                    }
                    Choice::Both => {
                        w.push(c)?;
                        active[a as usize] = true;
                        terminal = false;
                    }
                }
            }
            Clause::End(..) | Clause::Jump(..) => (),
            c => {
                let out = c.output().expect("arithmetic clause has an output");
                if !std::mem::replace(&mut active[out as usize], false) {
                    continue;
                }
                let (a, b) = c.operands();
                if let Some(a) = a {
                    active[a as usize] = true;
                }
                if let Some(b) = b {
                    active[b as usize] = true;
                }
                w.push(c)?;
            }
        }
    }
    assert_eq!(cursor, 0, "choice bit underflow");
    Some(terminal)
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;
    use crate::render::view::View;
    use crate::render::walk::eval_chain;
    use crate::tape::build_tape;

    /// min(sqrt((x+0.5)^2 + y^2) - 0.25, sqrt((x-0.5)^2 + y^2) - 0.25)
    fn two_circles(ctx: &mut Context) -> crate::context::Node {
        let mut circle = |dx: f64| {
            let x = ctx.x();
            let y = ctx.y();
            let c = ctx.constant(dx);
            let xs = ctx.add(x, c).unwrap();
            let xs2 = ctx.square(xs).unwrap();
            let y2 = ctx.square(y).unwrap();
            let r2 = ctx.add(xs2, y2).unwrap();
            let r = ctx.sqrt(r2).unwrap();
            let q = ctx.constant(0.25);
            ctx.sub(r, q).unwrap()
        };
        let a = circle(0.5);
        let b = circle(-0.5);
        ctx.min(a, b).unwrap()
    }

    fn harness<'a>(
        tape: &'a Tape,
        pool: &'a SubtapePool,
        depth: &'a DepthImage,
        fallbacks: &'a AtomicUsize,
        size: usize,
    ) -> StageCtx<'a> {
        StageCtx {
            tape,
            pool,
            depth,
            mapping: Mapping::new(&View::default(), size, true),
            dim: Dimension::Two,
            fallbacks,
        }
    }

    #[test]
    fn test_classification() {
        let mut ctx = Context::new();
        let root = two_circles(&mut ctx);
        let tape = build_tape(&ctx, root).unwrap();
        let pool = SubtapePool::new(256);
        let depth = DepthImage::new(256);
        let fallbacks = AtomicUsize::new(0);
        let c = harness(&tape, &pool, &depth, &fallbacks, 256);
        let mut scratch = TileScratch::new(&tape);

        // A corner tile is far outside both circles
        let (status, ..) =
            eval_tile(&c, &mut scratch, [0, 0, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Empty);

        // A tile straddling only the right circle's boundary is ambiguous,
        // and pruning the unreachable circle makes its subtape terminal
        let (status, handle, terminal) =
            eval_tile(&c, &mut scratch, [3, 1, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Ambiguous);
        assert_ne!(handle, NO_SUBTAPE);
        assert!(terminal, "one-circle tile should specialize to terminal");

        // A tile spanning the gap between the circles sees both; the min
        // stays ambiguous and the subtape is not terminal
        let (status, _, terminal) =
            eval_tile(&c, &mut scratch, [2, 1, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Ambiguous);
        assert!(!terminal);
    }

    #[test]
    fn test_specialization_equivalence() {
        let mut ctx = Context::new();
        let root = two_circles(&mut ctx);
        let tape = build_tape(&ctx, root).unwrap();
        let pool = SubtapePool::new(256);
        let depth = DepthImage::new(256);
        let fallbacks = AtomicUsize::new(0);
        let c = harness(&tape, &pool, &depth, &fallbacks, 256);
        let mut scratch = TileScratch::new(&tape);

        for coords in [[2u32, 1, 0], [1, 1, 0], [2, 2, 0], [0, 1, 0]] {
            let (status, handle, _) = eval_tile(
                &c,
                &mut scratch,
                coords,
                64,
                NO_SUBTAPE,
                false,
            );
            if status != TileStatus::Ambiguous {
                continue;
            }
            // Sample points inside the tile; parent and subtape must agree
            // bit-for-bit
            for i in 0..8 {
                for j in 0..8 {
                    let px = (coords[0] * 64 + i * 8) as f32 + 0.5;
                    let py = (coords[1] * 64 + j * 8) as f32 + 0.5;
                    let [wx, wy, wz] = c.mapping.point(px, py, 0.0);
                    let a = eval_chain(
                        &tape,
                        &pool,
                        NO_SUBTAPE,
                        wx,
                        wy,
                        wz,
                        &mut scratch.slots_f,
                    );
                    let b = eval_chain(
                        &tape,
                        &pool,
                        handle,
                        wx,
                        wy,
                        wz,
                        &mut scratch.slots_f,
                    );
                    assert_eq!(
                        a.to_bits(),
                        b.to_bits(),
                        "specialized tape diverges at ({wx}, {wy})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_has_no_choices() {
        let mut ctx = Context::new();
        let root = two_circles(&mut ctx);
        let tape = build_tape(&ctx, root).unwrap();
        let pool = SubtapePool::new(256);
        let depth = DepthImage::new(256);
        let fallbacks = AtomicUsize::new(0);
        let c = harness(&tape, &pool, &depth, &fallbacks, 256);
        let mut scratch = TileScratch::new(&tape);

        let (status, handle, terminal) =
            eval_tile(&c, &mut scratch, [3, 1, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Ambiguous);
        assert!(terminal);
        let min_max = SubtapeIter::new(&pool, handle)
            .take_while(|c| !matches!(c, Clause::End(..)))
            .filter(|c| c.choice_count() > 0)
            .count();
        assert_eq!(min_max, 0, "terminal subtape contains min/max");
    }

    #[test]
    fn test_pool_exhaustion_falls_back() {
        let mut ctx = Context::new();
        let root = two_circles(&mut ctx);
        let tape = build_tape(&ctx, root).unwrap();
        let pool = SubtapePool::new(2);
        let depth = DepthImage::new(256);
        let fallbacks = AtomicUsize::new(0);
        let c = harness(&tape, &pool, &depth, &fallbacks, 256);
        let mut scratch = TileScratch::new(&tape);

        // Drain the pool, then force a specialization attempt
        while pool.claim().is_some() {}
        let (status, handle, terminal) =
            eval_tile(&c, &mut scratch, [2, 1, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Ambiguous);
        assert_eq!(handle, NO_SUBTAPE);
        assert!(!terminal);
        assert_eq!(fallbacks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_filled_splat() {
        let mut ctx = Context::new();
        // -1 everywhere
        let c0 = ctx.constant(-1.0);
        let x = ctx.x();
        let zero = ctx.constant(0.0);
        let x0 = ctx.mul(x, zero).unwrap();
        let root = ctx.add(x0, c0).unwrap();
        let tape = build_tape(&ctx, root).unwrap();
        let pool = SubtapePool::new(16);
        let depth = DepthImage::new(64);
        let fallbacks = AtomicUsize::new(0);
        let c = harness(&tape, &pool, &depth, &fallbacks, 64);
        let mut scratch = TileScratch::new(&tape);

        let (status, ..) =
            eval_tile(&c, &mut scratch, [0, 0, 0], 64, NO_SUBTAPE, false);
        assert_eq!(status, TileStatus::Filled);

        splat_filled(&c, [0, 0, 0], 64);
        assert_eq!(depth.get(0, 0), u32::MAX);
        assert_eq!(depth.get(63, 63), u32::MAX);
    }
}

//! Per-stage tile bookkeeping
//!
//! Each stage of the hierarchy owns a compact array of candidate tiles.  A
//! tile records its packed grid position, the subtape handle that specializes
//! the shape to its region (inherited from its parent until the tile is
//! evaluated), a terminal flag, and the compaction slot assigned when the
//! tile survives as Ambiguous.
use crate::render::config::Dimension;
use crate::subtape::NO_SUBTAPE;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Tile candidates for a single stage of the hierarchy
pub(crate) struct TileStage {
    /// Side length of one tile, in pixels
    pub tile_size: usize,

    /// Number of tiles along each image axis
    pub per_side: usize,

    pub dim: Dimension,

    /// Packed grid position of each candidate
    pub pos: Vec<u32>,

    /// Subtape handle per candidate ([`NO_SUBTAPE`] = root tape)
    pub tape: Vec<AtomicU32>,

    /// Set when the tile's tape contains no min/max clauses
    pub terminal: Vec<AtomicBool>,

    /// Compaction slot in the next stage's array (-1 = inactive)
    pub next: Vec<AtomicI32>,

    /// Dense grid-position -> candidate-index lookup
    pub grid: Vec<i32>,
}

impl TileStage {
    fn cells(per_side: usize, dim: Dimension) -> usize {
        per_side.pow(dim.n())
    }

    fn empty(
        tile_size: usize,
        per_side: usize,
        dim: Dimension,
        count: usize,
    ) -> Self {
        let mut tape = Vec::with_capacity(count);
        tape.resize_with(count, || AtomicU32::new(NO_SUBTAPE));
        let mut terminal = Vec::with_capacity(count);
        terminal.resize_with(count, || AtomicBool::new(false));
        let mut next = Vec::with_capacity(count);
        next.resize_with(count, || AtomicI32::new(-1));
        Self {
            tile_size,
            per_side,
            dim,
            pos: vec![0; count],
            tape,
            terminal,
            next,
            grid: vec![-1; Self::cells(per_side, dim)],
        }
    }

    /// Builds the stage-0 candidate list, covering the whole image
    pub fn whole_image(
        tile_size: usize,
        image_size: usize,
        dim: Dimension,
        root_terminal: bool,
    ) -> Self {
        let per_side = image_size / tile_size;
        let count = Self::cells(per_side, dim);
        let mut out = Self::empty(tile_size, per_side, dim, count);
        for i in 0..count {
            out.pos[i] = i as u32;
            *out.terminal[i].get_mut() = root_terminal;
            out.grid[i] = i as i32;
        }
        out
    }

    /// Number of tile candidates
    pub fn len(&self) -> usize {
        self.pos.len()
    }

    /// Number of children each surviving tile produces at the given size
    pub fn children_per_tile(&self, child_size: usize) -> usize {
        (self.tile_size / child_size).pow(self.dim.n())
    }

    /// Unpacks a grid position into (x, y, z) tile coordinates
    #[inline]
    pub fn unpack(&self, pos: u32) -> [u32; 3] {
        let n = self.per_side as u32;
        [pos % n, (pos / n) % n, pos / (n * n)]
    }

    /// Packs (x, y, z) tile coordinates into a grid position
    #[inline]
    pub fn pack(&self, x: u32, y: u32, z: u32) -> u32 {
        let n = self.per_side as u32;
        x + n * (y + n * z)
    }

    /// Materializes the children of every surviving tile into a new stage
    ///
    /// Children inherit their parent's subtape handle and terminal flag, and
    /// land at the compaction slot assigned during evaluation.
    pub fn subdivide(&self, child_size: usize, active: usize) -> Self {
        let ratio = self.tile_size / child_size;
        let cpt = self.children_per_tile(child_size);
        let mut child = Self::empty(
            child_size,
            self.per_side * ratio,
            self.dim,
            active * cpt,
        );
        let rz = match self.dim {
            Dimension::Two => 1,
            Dimension::Three => ratio,
        };
        for i in 0..self.len() {
            let slot = self.next[i].load(Ordering::Relaxed);
            if slot < 0 {
                continue;
            }
            let [px, py, pz] = self.unpack(self.pos[i]);
            let tape = self.tape[i].load(Ordering::Relaxed);
            let term = self.terminal[i].load(Ordering::Relaxed);
            let mut j = slot as usize * cpt;
            for dz in 0..rz {
                for dy in 0..ratio {
                    for dx in 0..ratio {
                        child.pos[j] = child.pack(
                            px * ratio as u32 + dx as u32,
                            py * ratio as u32 + dy as u32,
                            pz * rz as u32 + dz as u32,
                        );
                        *child.tape[j].get_mut() = tape;
                        *child.terminal[j].get_mut() = term;
                        j += 1;
                    }
                }
            }
        }
        for (i, &p) in child.pos.iter().enumerate() {
            child.grid[p as usize] = i as i32;
        }
        child
    }

    /// Looks up the subtape handle covering the given tile coordinates
    ///
    /// Returns `None` if no candidate at this stage contains the position.
    pub fn handle_at(&self, x: u32, y: u32, z: u32) -> Option<u32> {
        let s = self.tile_size as u32;
        let i = self.grid[self.pack(x / s, y / s, z / s) as usize];
        if i < 0 {
            None
        } else {
            Some(self.tape[i as usize].load(Ordering::Relaxed))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let stage =
            TileStage::whole_image(64, 512, Dimension::Three, false);
        assert_eq!(stage.per_side, 8);
        assert_eq!(stage.len(), 512);
        for pos in [0u32, 7, 63, 511] {
            let [x, y, z] = stage.unpack(pos);
            assert_eq!(stage.pack(x, y, z), pos);
        }
    }

    #[test]
    fn test_subdivide() {
        let stage = TileStage::whole_image(64, 128, Dimension::Two, false);
        assert_eq!(stage.len(), 4);

        // Mark tile (1, 0) as the only survivor, in compaction slot 0
        stage.next[1].store(0, Ordering::Relaxed);
        stage.tape[1].store(17, Ordering::Relaxed);
        stage.terminal[1].store(true, Ordering::Relaxed);

        let child = stage.subdivide(8, 1);
        assert_eq!(child.len(), 64);
        assert_eq!(child.per_side, 16);
        for i in 0..child.len() {
            let [x, y, _] = child.unpack(child.pos[i]);
            assert!((8..16).contains(&x), "child x {x} outside parent");
            assert!(y < 8, "child y {y} outside parent");
            assert_eq!(child.tape[i].load(Ordering::Relaxed), 17);
            assert!(child.terminal[i].load(Ordering::Relaxed));
        }
        assert_eq!(child.handle_at(64, 0, 0), Some(17));
        assert_eq!(child.handle_at(0, 0, 0), None);
    }
}

//! Shared pool of subtape chunks
//!
//! Tile specialization writes pruned clause sequences into fixed-size
//! [`Chunk`]s claimed from a process-wide [`SubtapePool`].  Chunks are
//! doubly linked into chains: `next` points toward the root-most chunk
//! (forward evaluation order) and `prev` toward the leaf-most.  There is no
//! free operation; the whole pool is bulk-reset between renders.
//!
//! Chunks are written *backwards* from the high end, because specialization
//! walks its parent tape in reverse; once writing finishes, `start` is the
//! offset of the first live clause and the chunk is sealed.  Sealed chunks
//! are read-only for the rest of the render.
use crate::tape::Clause;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of clauses per subtape chunk
pub const CHUNK_CLAUSES: usize = 64;

/// Handle value meaning "no subtape; use the root tape"
pub const NO_SUBTAPE: u32 = 0;

/// A fixed-capacity span of clauses within a subtape chain
#[derive(Copy, Clone)]
pub struct Chunk {
    /// Clause storage, written backwards from the high end
    pub data: [Clause; CHUNK_CLAUSES],

    /// Offset of the first live clause
    pub start: u32,

    /// Forward link, toward the root-most chunk (0 = chain ends here)
    pub next: u32,

    /// Back link, toward the leaf-most chunk (0 = chain starts here)
    pub prev: u32,
}

impl Default for Chunk {
    fn default() -> Self {
        Chunk {
            data: [Clause::End(0); CHUNK_CLAUSES],
            start: CHUNK_CLAUSES as u32,
            next: 0,
            prev: 0,
        }
    }
}

/// Globally shared chunk pool with an atomic claim counter
///
/// Claiming is wait-free; the only cross-worker communication is the bump
/// counter.  Chunk 0 is reserved so that handle 0 can mean "no subtape".
pub struct SubtapePool {
    chunks: Vec<UnsafeCell<Chunk>>,
    claimed: AtomicU32,
}

// SAFETY: a chunk is only written between `claim()` returning its index and
// the end of the owning worker's specialization pass; the claim protocol
// hands each index to exactly one worker.  All cross-worker reads happen
// after the driver's stage barrier, once the chunk is sealed.
unsafe impl Sync for SubtapePool {}

impl SubtapePool {
    /// Builds a pool with the given total chunk capacity
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "pool must hold at least one usable chunk");
        let mut chunks = Vec::with_capacity(capacity);
        chunks.resize_with(capacity, || UnsafeCell::new(Chunk::default()));
        Self {
            chunks,
            claimed: AtomicU32::new(1),
        }
    }

    /// Resets the claim index, invalidating every previous handle
    pub fn reset(&mut self) {
        self.claimed.store(1, Ordering::Relaxed);
    }

    /// Claims the next free chunk, returning its handle
    ///
    /// Returns `None` when the pool is exhausted; the caller is expected to
    /// fall back to its parent tape.
    pub fn claim(&self) -> Option<u32> {
        let i = self.claimed.fetch_add(1, Ordering::Relaxed);
        if (i as usize) < self.chunks.len() {
            Some(i)
        } else {
            None
        }
    }

    /// Number of chunks claimed since the last reset
    pub fn claimed(&self) -> usize {
        (self.claimed.load(Ordering::Relaxed) as usize - 1)
            .min(self.chunks.len() - 1)
    }

    /// Reads a sealed chunk
    pub(crate) fn chunk(&self, i: u32) -> &Chunk {
        // SAFETY: see the `Sync` impl; callers only pass handles to chunks
        // that have been sealed by a prior stage or by this worker
        unsafe { &*self.chunks[i as usize].get() }
    }

    /// Grants mutable access to a chunk
    ///
    /// # Safety
    /// The caller must own the chunk via [`claim`](Self::claim) and must not
    /// hold any other reference to it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn chunk_mut(&self, i: u32) -> &mut Chunk {
        &mut *self.chunks[i as usize].get()
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Writes a clause chain backwards into freshly claimed chunks
///
/// The first chunk claimed becomes the root-most chunk of the chain; when a
/// chunk fills, the writer claims another, links the pair, and plants a
/// [`Clause::Jump`] at the top of the new chunk pointing at the filled one.
pub(crate) struct SubtapeWriter<'a> {
    pool: &'a SubtapePool,
    chunk: u32,
    cursor: usize,
}

impl<'a> SubtapeWriter<'a> {
    /// Claims the initial (root-most) chunk
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn new(pool: &'a SubtapePool) -> Option<Self> {
        let chunk = pool.claim()?;
        // SAFETY: freshly claimed, unshared until sealed
        let c = unsafe { pool.chunk_mut(chunk) };
        *c = Chunk::default();
        Some(Self {
            pool,
            chunk,
            cursor: CHUNK_CLAUSES,
        })
    }

    /// Pushes a clause in front of everything written so far
    ///
    /// Returns `None` if a fresh chunk was needed and the pool is exhausted.
    pub fn push(&mut self, clause: Clause) -> Option<()> {
        if self.cursor == 0 {
            let new = self.pool.claim()?;
            let old = self.chunk;
            // SAFETY: both chunks are owned by this writer
            unsafe {
                let c = self.pool.chunk_mut(old);
                c.start = 0;
                c.prev = new;
                let n = self.pool.chunk_mut(new);
                *n = Chunk::default();
                n.next = old;
            }
            // Forward jump from the top of the new chunk to the first live
            // clause of the one that just filled
            let from = new as i64 * CHUNK_CLAUSES as i64
                + (CHUNK_CLAUSES as i64 - 1);
            let to = old as i64 * CHUNK_CLAUSES as i64;
            // SAFETY: `new` is owned by this writer
            unsafe {
                self.pool.chunk_mut(new).data[CHUNK_CLAUSES - 1] =
                    Clause::Jump((to - from) as i32);
            }
            self.chunk = new;
            self.cursor = CHUNK_CLAUSES - 1;
        }
        self.cursor -= 1;
        // SAFETY: the current chunk is owned by this writer
        unsafe {
            self.pool.chunk_mut(self.chunk).data[self.cursor] = clause;
        }
        Some(())
    }

    /// Seals the chain and returns the leaf-most chunk handle
    pub fn finish(self) -> u32 {
        // SAFETY: the current chunk is owned by this writer
        unsafe {
            self.pool.chunk_mut(self.chunk).start = self.cursor as u32;
        }
        self.chunk
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Walks a chain in forward evaluation order, following jump clauses
///
/// Yields every clause including the terminating [`Clause::End`]; the caller
/// is expected to stop at it.
pub(crate) struct SubtapeIter<'a> {
    pool: &'a SubtapePool,
    chunk: u32,
    pos: usize,
}

impl<'a> SubtapeIter<'a> {
    pub fn new(pool: &'a SubtapePool, leaf: u32) -> Self {
        let pos = pool.chunk(leaf).start as usize;
        Self {
            pool,
            chunk: leaf,
            pos,
        }
    }

    /// Position of the most recently yielded clause
    pub fn last_position(&self) -> (u32, usize) {
        (self.chunk, self.pos - 1)
    }
}

impl Iterator for SubtapeIter<'_> {
    type Item = Clause;
    fn next(&mut self) -> Option<Clause> {
        loop {
            if self.pos >= CHUNK_CLAUSES {
                return None;
            }
            let c = self.pool.chunk(self.chunk).data[self.pos];
            if let Clause::Jump(offset) = c {
                let g = self.chunk as i64 * CHUNK_CLAUSES as i64
                    + self.pos as i64
                    + offset as i64;
                self.chunk = (g / CHUNK_CLAUSES as i64) as u32;
                self.pos = (g % CHUNK_CLAUSES as i64) as usize;
                continue;
            }
            self.pos += 1;
            return Some(c);
        }
    }
}

/// Walks a chain backwards from a given clause position, following `prev`
/// links and skipping jump sentinels
pub(crate) struct SubtapeRevIter<'a> {
    pool: &'a SubtapePool,
    chunk: u32,
    pos: usize,
}

impl<'a> SubtapeRevIter<'a> {
    /// Starts walking backwards from (and excluding) the given position
    pub fn new(pool: &'a SubtapePool, chunk: u32, pos: usize) -> Self {
        Self { pool, chunk, pos }
    }
}

impl Iterator for SubtapeRevIter<'_> {
    type Item = Clause;
    fn next(&mut self) -> Option<Clause> {
        loop {
            let c = self.pool.chunk(self.chunk);
            if self.pos <= c.start as usize {
                if c.prev == 0 {
                    return None;
                }
                self.chunk = c.prev;
                self.pos = CHUNK_CLAUSES;
                continue;
            }
            self.pos -= 1;
            let clause = c.data[self.pos];
            if let Clause::Jump(..) = clause {
                continue;
            }
            return Some(clause);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_claim_and_reset() {
        let mut pool = SubtapePool::new(4);
        assert_eq!(pool.claim(), Some(1));
        assert_eq!(pool.claim(), Some(2));
        assert_eq!(pool.claim(), Some(3));
        assert_eq!(pool.claim(), None);
        assert_eq!(pool.claimed(), 3);
        pool.reset();
        assert_eq!(pool.claimed(), 0);
        assert_eq!(pool.claim(), Some(1));
    }

    #[test]
    fn test_writer_single_chunk() {
        let pool = SubtapePool::new(16);
        let mut w = SubtapeWriter::new(&pool).unwrap();
        w.push(Clause::End(1)).unwrap();
        w.push(Clause::SquareReg(1, 2)).unwrap();
        let leaf = w.finish();

        let out: Vec<Clause> = SubtapeIter::new(&pool, leaf).collect();
        assert_eq!(out, vec![Clause::SquareReg(1, 2), Clause::End(1)]);

        let c = pool.chunk(leaf);
        assert_eq!(c.next, 0);
        assert_eq!(c.prev, 0);
        assert_eq!(c.start, (CHUNK_CLAUSES - 2) as u32);
    }

    #[test]
    fn test_writer_chain() {
        let pool = SubtapePool::new(16);
        let mut w = SubtapeWriter::new(&pool).unwrap();
        // 200 clauses forces multiple chunks
        w.push(Clause::End(1)).unwrap();
        for i in (0..200u32).rev() {
            w.push(Clause::AddRegImm(1, 1, i as f32)).unwrap();
        }
        let leaf = w.finish();

        let out: Vec<Clause> = SubtapeIter::new(&pool, leaf)
            .take_while(|c| !matches!(c, Clause::End(..)))
            .collect();
        assert_eq!(out.len(), 200);
        for (i, c) in out.iter().enumerate() {
            assert_eq!(*c, Clause::AddRegImm(1, 1, i as f32));
        }

        // Chain integrity: `next` from the leaf reaches a chunk with
        // next == 0; `prev` from the root reaches prev == 0; no chunk is
        // visited twice
        let mut seen = std::collections::HashSet::new();
        let mut i = leaf;
        let root = loop {
            assert!(seen.insert(i));
            let c = pool.chunk(i);
            if c.next == 0 {
                break i;
            }
            i = c.next;
        };
        let mut seen_rev = std::collections::HashSet::new();
        let mut i = root;
        loop {
            assert!(seen_rev.insert(i));
            let c = pool.chunk(i);
            if c.prev == 0 {
                break;
            }
            i = c.prev;
        }
        assert_eq!(seen, seen_rev);

        // The reverse walker yields the same clauses, reversed
        let end = SubtapeIter::new(&pool, leaf)
            .position(|c| matches!(c, Clause::End(..)))
            .unwrap();
        let mut it = SubtapeIter::new(&pool, leaf);
        for _ in 0..=end {
            it.next().unwrap();
        }
        let (chunk, pos) = it.last_position();
        let rev: Vec<Clause> =
            SubtapeRevIter::new(&pool, chunk, pos).collect();
        assert_eq!(rev.len(), 200);
        for (i, c) in rev.iter().enumerate() {
            assert_eq!(*c, Clause::AddRegImm(1, 1, (199 - i) as f32));
        }
    }

    #[test]
    fn test_writer_exhaustion() {
        let pool = SubtapePool::new(2);
        let mut w = SubtapeWriter::new(&pool).unwrap();
        for _ in 0..CHUNK_CLAUSES {
            w.push(Clause::CopyImm(1, 0.0)).unwrap();
        }
        // The next push needs a second chunk, and the pool only had one
        assert!(w.push(Clause::CopyImm(1, 0.0)).is_none());
    }
}

//! Output images
//!
//! The depth image is the only cross-worker output surface: tile and pixel
//! workers accumulate into it with `fetch_max`, which is commutative, so the
//! final image is independent of worker interleaving.
use std::sync::atomic::{AtomicU32, Ordering};

/// Square depth image with atomic-max accumulation
///
/// For 2D renders a nonzero pixel means "filled"; for 3D the value is the
/// highest voxel Z known to be inside the shape, with zero meaning "no
/// coverage".
pub struct DepthImage {
    data: Vec<AtomicU32>,
    size: usize,
}

impl DepthImage {
    /// Builds a zero-filled image with `size` pixels per side
    pub fn new(size: usize) -> Self {
        let mut data = Vec::with_capacity(size * size);
        data.resize_with(size * size, || AtomicU32::new(0));
        Self { data, size }
    }

    /// Returns the image size in pixels per side
    pub fn size(&self) -> usize {
        self.size
    }

    /// Clears the image to zero
    pub fn reset(&mut self) {
        for v in self.data.iter_mut() {
            *v.get_mut() = 0;
        }
    }

    /// Reads a pixel
    ///
    /// Mid-render this is a plain (relaxed) read, used for occlusion tests;
    /// a stale value only makes culling pessimistic, never unsound.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.data[y as usize * self.size + x as usize].load(Ordering::Relaxed)
    }

    /// Accumulates a pixel with max semantics
    #[inline]
    pub fn max(&self, x: u32, y: u32, v: u32) {
        self.data[y as usize * self.size + x as usize]
            .fetch_max(v, Ordering::Relaxed);
    }

    /// Copies the image into a plain vector, row-major
    pub fn snapshot(&self) -> Vec<u32> {
        self.data.iter().map(|v| v.load(Ordering::Relaxed)).collect()
    }
}

/// Surface selection for [`copy_to`](crate::render::Renderer::copy_to)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SurfaceMode {
    /// Depth (3D) or fill mask (2D)
    Depth,
    /// Packed RGB-encoded surface normals (3D only)
    Normal,
}

////////////////////////////////////////////////////////////////////////////////

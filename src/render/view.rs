//! View transforms from image space to world space
use crate::types::Interval;
use nalgebra::Matrix4;

/// Camera settings for a single render
///
/// The basic mapping sends pixel coordinates through normalized device
/// coordinates (`[-1, 1]` per axis) to `ndc * scale + center`.  When `mat` is
/// given, it replaces the scale/center mapping entirely: NDC points are
/// transformed by the full 4x4 matrix with a projective divide.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct View {
    /// Half-width of the rendered region, in model units
    pub scale: f32,

    /// Center of the rendered region
    pub center: [f32; 3],

    /// Optional perspective / projection transform
    pub mat: Option<Matrix4<f32>>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            scale: 1.0,
            center: [0.0; 3],
            mat: None,
        }
    }
}

impl View {
    /// Builds an orthographic view from a center and scale
    pub fn from_center_and_scale(center: [f32; 3], scale: f32) -> Self {
        Self {
            center,
            scale,
            mat: None,
        }
    }
}

/// Precomputed image-space to world-space mapping for one render
///
/// In 2D renders the Z input is pinned to `view.center[2]`, so the output is
/// independent of the Z axis.
#[derive(Copy, Clone)]
pub(crate) struct Mapping {
    size: f32,
    view: View,
    two_d: bool,
}

impl Mapping {
    pub fn new(view: &View, image_size: usize, two_d: bool) -> Self {
        Self {
            size: image_size as f32,
            view: *view,
            two_d,
        }
    }

    /// Converts a pixel coordinate (in `[0, size]`) to NDC
    #[inline]
    fn ndc(&self, p: f32) -> f32 {
        2.0 * p / self.size - 1.0
    }

    /// Maps a box of pixel coordinates to world-space intervals
    ///
    /// `lo` and `hi` are corner coordinates in pixels (voxels for Z).
    pub fn tile_box(&self, lo: [u32; 3], hi: [u32; 3]) -> [Interval; 3] {
        let x = Interval::new(self.ndc(lo[0] as f32), self.ndc(hi[0] as f32));
        let y = Interval::new(self.ndc(lo[1] as f32), self.ndc(hi[1] as f32));
        let z = if self.two_d {
            Interval::from(0.0)
        } else {
            Interval::new(self.ndc(lo[2] as f32), self.ndc(hi[2] as f32))
        };
        if let Some(mat) = &self.view.mat {
            let out = Self::transform_box(mat, x, y, z);
            if self.two_d {
                [out[0], out[1], Interval::from(self.view.center[2])]
            } else {
                out
            }
        } else {
            let s = self.view.scale;
            let c = self.view.center;
            [
                x * s + c[0],
                y * s + c[1],
                if self.two_d {
                    Interval::from(c[2])
                } else {
                    z * s + c[2]
                },
            ]
        }
    }

    /// Pushes NDC intervals through the full 4x4 transform, with an
    /// element-wise projective divide
    fn transform_box(
        mat: &Matrix4<f32>,
        x: Interval,
        y: Interval,
        z: Interval,
    ) -> [Interval; 3] {
        let row = |r: usize| {
            x * mat[(r, 0)]
                + y * mat[(r, 1)]
                + z * mat[(r, 2)]
                + Interval::from(mat[(r, 3)])
        };
        let w = row(3);
        [row(0) / w, row(1) / w, row(2) / w]
    }

    /// Maps a single pixel-space point to world space
    pub fn point(&self, px: f32, py: f32, pz: f32) -> [f32; 3] {
        let x = self.ndc(px);
        let y = self.ndc(py);
        let z = if self.two_d { 0.0 } else { self.ndc(pz) };
        if let Some(mat) = &self.view.mat {
            let p = mat * nalgebra::Vector4::new(x, y, z, 1.0);
            let out = [p.x / p.w, p.y / p.w, p.z / p.w];
            if self.two_d {
                [out[0], out[1], self.view.center[2]]
            } else {
                out
            }
        } else {
            let s = self.view.scale;
            let c = self.view.center;
            [
                x * s + c[0],
                y * s + c[1],
                if self.two_d { c[2] } else { z * s + c[2] },
            ]
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

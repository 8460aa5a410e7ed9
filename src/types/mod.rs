//! Value types used by the tape evaluators
//!
//! Each evaluator runs the same clause stream over a different value type:
//! [`Interval`] for per-tile range analysis, `f32` and [`Float2`] for
//! per-pixel evaluation, and [`Grad`] for surface normals.
mod float2;
mod grad;
mod interval;

pub use float2::Float2;
pub use grad::Grad;
pub use interval::{Choice, Interval};

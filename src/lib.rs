//! Massively parallel rendering of implicit surfaces, using hierarchical
//! interval-pruned evaluation tapes.
//!
//! A shape is an arithmetic expression over the spatial variables `x`, `y`,
//! `z`; its zero isosurface is the rendered object.  The expression is
//! compiled to a linear *tape* of register-machine clauses, then rendered by
//! recursive spatial subdivision: each tile evaluates the tape with interval
//! arithmetic, and ambiguous tiles write a *subtape* containing only the
//! clauses that can still affect their region, so the per-pixel work at the
//! bottom of the hierarchy runs on drastically shortened tapes.
//!
//! ```
//! use relief::{
//!     context::Context,
//!     render::{RenderConfig, Renderer, View},
//! };
//!
//! let mut ctx = Context::new();
//! let x = ctx.x();
//! let y = ctx.y();
//! let x2 = ctx.square(x).unwrap();
//! let y2 = ctx.square(y).unwrap();
//! let r2 = ctx.add(x2, y2).unwrap();
//! let r = ctx.sqrt(r2).unwrap();
//! let one = ctx.constant(1.0);
//! let circle = ctx.sub(r, one).unwrap();
//!
//! let mut r =
//!     Renderer::build(&ctx, circle, 64, RenderConfig::default_2d()).unwrap();
//! r.run(&View::default());
//! for y in (0..64).step_by(4) {
//!     for x in (0..64).step_by(2) {
//!         print!("{}", if r.height_at(x, y) != 0 { 'X' } else { ' ' });
//!     }
//!     println!();
//! }
//! ```
pub mod context;
pub mod render;
pub mod subtape;
pub mod tape;
pub mod types;

mod error;
pub use error::Error;

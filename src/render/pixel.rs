//! Per-pixel (and per-voxel) evaluation of the finest specialized tapes
use crate::render::tile_eval::{StageCtx, TileScratch};
use crate::render::walk::eval_chain;
use crate::types::Float2;

/// Renders every pixel of one 2D tile
///
/// Pixels with a negative field value are set to the maximum depth value
/// (filled); everything else is left untouched.
pub(crate) fn draw_tile_2d(
    ctx: &StageCtx,
    scratch: &mut TileScratch,
    coords: [u32; 3],
    tile_size: usize,
    handle: u32,
) {
    let s = tile_size as u32;
    let x0 = coords[0] * s;
    let y0 = coords[1] * s;
    for j in 0..s {
        for i in 0..s {
            let (px, py) = (x0 + i, y0 + j);
            let [wx, wy, wz] = ctx
                .mapping
                .point(px as f32 + 0.5, py as f32 + 0.5, 0.0);
            let v = eval_chain(
                ctx.tape,
                ctx.pool,
                handle,
                wx,
                wy,
                wz,
                &mut scratch.slots_f,
            );
            if v < 0.0 {
                ctx.depth.max(px, py, u32::MAX);
            }
        }
    }
}

/// Renders every voxel column of one 3D tile
///
/// Voxels are evaluated top-down in packed pairs; the first voxel inside the
/// shape sets the column's depth via atomic max and ends the column.
pub(crate) fn draw_tile_3d(
    ctx: &StageCtx,
    scratch: &mut TileScratch,
    coords: [u32; 3],
    tile_size: usize,
    handle: u32,
) {
    let s = tile_size as u32;
    let x0 = coords[0] * s;
    let y0 = coords[1] * s;
    let z0 = coords[2] * s;
    let ztop = z0 + s - 1;
    debug_assert!(s % 2 == 0, "packed evaluation needs an even tile size");

    for j in 0..s {
        for i in 0..s {
            let (px, py) = (x0 + i, y0 + j);
            // Skip columns already covered at or above this tile
            if ctx.depth.get(px, py) >= ztop {
                continue;
            }
            let mut z = ztop;
            'column: loop {
                // Two adjacent voxels per evaluation, upper lane first
                let (z_hi, z_lo) = (z, z - 1);
                let a = ctx.mapping.point(
                    px as f32 + 0.5,
                    py as f32 + 0.5,
                    z_hi as f32 + 0.5,
                );
                let b = ctx.mapping.point(
                    px as f32 + 0.5,
                    py as f32 + 0.5,
                    z_lo as f32 + 0.5,
                );
                let v = eval_chain(
                    ctx.tape,
                    ctx.pool,
                    handle,
                    Float2::new(a[0], b[0]),
                    Float2::new(a[1], b[1]),
                    Float2::new(a[2], b[2]),
                    &mut scratch.slots_p,
                );
                if v.0[0] < 0.0 {
                    ctx.depth.max(px, py, z_hi);
                    break 'column;
                }
                if v.0[1] < 0.0 {
                    ctx.depth.max(px, py, z_lo);
                    break 'column;
                }
                if z_lo <= z0 || z_lo <= ctx.depth.get(px, py) {
                    break 'column;
                }
                z -= 2;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

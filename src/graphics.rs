//! Vertex layout, uniform layout, and limits shared by
//! the command queue, the restoration layer, and backends.

use crate::rect::Rect;

/// Number of `f32`s per vertex:
/// destination position (2), source position (2),
/// color scale (4), and custom attributes (4).
pub const VERTEX_FLOAT_COUNT: usize = 12;

/// Maximum number of source images a single draw can sample.
pub const SHADER_SRC_IMAGE_COUNT: usize = 4;

/// Maximum number of vertices in one vertex buffer generation.
///
/// Indices are `u32`, so a generation never addresses more
/// than `u32::MAX` vertices. On 32-bit targets the bound is lowered
/// so that the total float count still fits in an `i32`.
#[cfg(target_pointer_width = "64")]
pub const MAX_VERTEX_COUNT: usize = u32::MAX as usize;
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_VERTEX_COUNT: usize = i32::MAX as usize / VERTEX_FLOAT_COUNT;

pub const MAX_VERTEX_FLOAT_COUNT: usize = MAX_VERTEX_COUNT * VERTEX_FLOAT_COUNT;

/// Dword offsets of the preserved uniform block, which is prepended
/// to the uniforms of every draw.
pub mod preserved {
    /// Destination texture size (vec2).
    pub const DST_TEXTURE_SIZE: usize = 0;
    /// Source texture sizes (4 x vec2).
    pub const SRC_TEXTURE_SIZES: usize = 2;
    /// Destination region origin (vec2).
    pub const DST_REGION_ORIGIN: usize = 10;
    /// Destination region size (vec2).
    pub const DST_REGION_SIZE: usize = 12;
    /// Source region origins (4 x vec2).
    pub const SRC_REGION_ORIGINS: usize = 14;
    /// Source region sizes (4 x vec2).
    pub const SRC_REGION_SIZES: usize = 22;
    /// Projection matrix (mat4, column-major).
    pub const PROJECTION_MATRIX: usize = 30;
    /// Total size of the block.
    pub const DWORD_COUNT: usize = 46;
}

pub const PRESERVED_UNIFORM_DWORD_COUNT: usize = preserved::DWORD_COUNT;

/// Returns the vertices for a quad drawing `src` into `dst`
/// with the given color scale.
pub fn quad_vertices(dst: Rect, src: Rect, color: [f32; 4]) -> Vec<f32> {
    let (dx0, dy0) = (dst.pos.x as f32, dst.pos.y as f32);
    let (dx1, dy1) = (dst.max().x as f32, dst.max().y as f32);
    let (sx0, sy0) = (src.pos.x as f32, src.pos.y as f32);
    let (sx1, sy1) = (src.max().x as f32, src.max().y as f32);
    let [r, g, b, a] = color;

    let mut vertices = Vec::with_capacity(4 * VERTEX_FLOAT_COUNT);
    for (dx, dy, sx, sy) in [
        (dx0, dy0, sx0, sy0),
        (dx1, dy0, sx1, sy0),
        (dx0, dy1, sx0, sy1),
        (dx1, dy1, sx1, sy1),
    ] {
        vertices.extend_from_slice(&[dx, dy, sx, sy, r, g, b, a, 0., 0., 0., 0.]);
    }
    vertices
}

/// Indices for a single quad produced by [`quad_vertices`].
pub fn quad_indices() -> [u32; 6] {
    [0, 1, 2, 1, 2, 3]
}

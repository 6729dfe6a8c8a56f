//! Host-side geometry and brush-footprint math shared by every crate in the
//! stroke accumulation engine. Kept dependency-free, mirroring the
//! dependency-free `renderer::geometry`/`renderer::dirty` modules this crate
//! generalizes from a single renderer into a shared library.

mod brush_math;
mod rect;

pub use brush_math::{
    alpha_darken, alpha_darken_color, auto_render_scale, effective_radius, scaled_texture_dim,
};
pub use rect::{rect_to_tile_coords, tile_rect, Rect, TileCoord};

//! Layer-stack compositing (spec §4.8): blends a document's visible layers
//! into a presentable raster and commits finished strokes into their target
//! layer's tiles.

mod blend_math;
mod layer_renderer;

pub use layer_renderer::{LayerEntry, LayerRenderer};

//! Tiled per-layer texture storage and the selection clipping mask: the
//! resident-on-GPU half of layer state, independent of compositing and
//! brush dispatch.

mod selection_mask;
mod store;

pub use selection_mask::SelectionMaskGpu;
pub use store::{Tile, TileSlotKey, TileStore, TileUploadError, TILE_SIZE};

#[cfg(test)]
mod tests;

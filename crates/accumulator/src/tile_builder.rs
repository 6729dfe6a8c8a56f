//! Tile builder: partitions a compute dispatch's bounding rectangle into
//! dispatch tiles obeying the shared-memory and dispatch-count limits of
//! spec §4.4, generalized from this lineage's `TileAtlasConfig`-driven tile
//! partitioning (`renderer::planning`) down to the single-bbox case a
//! compute dispatch needs instead of a persistent atlas grid.

use stroke_geom::Rect;
use stroke_protocol::limits::{MAX_SINGLE_TILE_AREA, MAX_TILES_PER_DISPATCH, WORKGROUP_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileBuildError {
    TooManyTiles { count: usize, limit: usize },
}

impl std::fmt::Display for TileBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileBuildError::TooManyTiles { count, limit } => {
                write!(f, "dispatch would need {count} tiles, exceeding the {limit} tile limit")
            }
        }
    }
}

impl std::error::Error for TileBuildError {}

/// One dispatch tile: its pixel-space rect and the workgroup counts it
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTile {
    pub rect: Rect,
}

impl DispatchTile {
    pub fn workgroups(&self) -> (u32, u32) {
        (
            self.rect.width().div_ceil(WORKGROUP_SIZE),
            self.rect.height().div_ceil(WORKGROUP_SIZE),
        )
    }
}

/// Partitions `rect` into dispatch tiles: a single tile if its area is at
/// or under the per-tile area cap, otherwise a grid of tiles with side
/// `floor(sqrt(MAX_SINGLE_TILE_AREA))`. Rejects partitions needing more
/// than `MAX_TILES_PER_DISPATCH` tiles.
pub fn build_dispatch_tiles(rect: Rect) -> Result<Vec<DispatchTile>, TileBuildError> {
    if rect.is_empty() {
        return Ok(Vec::new());
    }
    if rect.area() <= MAX_SINGLE_TILE_AREA {
        return Ok(vec![DispatchTile { rect }]);
    }

    let side = (MAX_SINGLE_TILE_AREA as f64).sqrt().floor() as i32;
    let side = side.max(1);
    let mut tiles = Vec::new();
    let mut y = rect.min_y;
    while y < rect.max_y {
        let mut x = rect.min_x;
        let tile_max_y = (y + side).min(rect.max_y);
        while x < rect.max_x {
            let tile_max_x = (x + side).min(rect.max_x);
            tiles.push(DispatchTile {
                rect: Rect::new(x, y, tile_max_x, tile_max_y),
            });
            x += side;
        }
        y += side;
    }

    if tiles.len() > MAX_TILES_PER_DISPATCH {
        return Err(TileBuildError::TooManyTiles {
            count: tiles.len(),
            limit: MAX_TILES_PER_DISPATCH,
        });
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_rect_is_a_single_tile() {
        let tiles = build_dispatch_tiles(Rect::new(0, 0, 100, 100)).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].rect, Rect::new(0, 0, 100, 100));
    }

    #[test]
    fn empty_rect_yields_no_tiles() {
        assert!(build_dispatch_tiles(Rect::EMPTY).unwrap().is_empty());
    }

    #[test]
    fn large_rect_is_partitioned_into_multiple_tiles() {
        // 2000x2000 area is 4,000,000 px > 2,000,000 cap.
        let tiles = build_dispatch_tiles(Rect::new(0, 0, 2000, 2000)).unwrap();
        assert!(tiles.len() > 1);
        for tile in &tiles {
            assert!(tile.rect.area() <= MAX_SINGLE_TILE_AREA);
        }
        // union of tiles covers the whole rect exactly.
        let union = tiles
            .iter()
            .fold(Rect::EMPTY, |acc, tile| acc.union(&tile.rect));
        assert_eq!(union, Rect::new(0, 0, 2000, 2000));
    }

    #[test]
    fn excessive_tile_count_is_rejected() {
        // side ~= 1414; to exceed 256 tiles we need an absurdly long strip.
        let huge = Rect::new(0, 0, 1414 * 300, 1);
        let err = build_dispatch_tiles(huge).unwrap_err();
        assert!(matches!(err, TileBuildError::TooManyTiles { .. }));
    }

    #[test]
    fn workgroup_counts_round_up() {
        let tile = DispatchTile {
            rect: Rect::new(0, 0, 10, 10),
        };
        assert_eq!(tile.workgroups(), (2, 2));
    }
}

//! `TileStore`: per-layer sparse map from tile coordinate to GPU texture,
//! with tile-rect math and bulk upload from an external host raster,
//! generalized from this lineage's shared-atlas-of-pages model
//! (`tiles::atlas::core::TileAtlasStore`) down to the plain per-layer
//! `HashMap<TileCoord, Tile>` spec §3 "Tile" describes, backed by
//! [`residency::ResidencyManager`] for the LRU byte budget instead of the
//! atlas's generation/retain-batch GC.

use std::collections::HashMap;

use residency::ResidencyManager;
use stroke_geom::{rect_to_tile_coords, tile_rect, Rect, TileCoord};
use stroke_protocol::LayerId;

pub const TILE_SIZE: u32 = 256;
const TILE_BYTES_PER_PIXEL: u64 = 4;

fn tile_byte_size(tile_size: u32) -> u64 {
    u64::from(tile_size) * u64::from(tile_size) * TILE_BYTES_PER_PIXEL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSlotKey {
    pub layer: LayerId,
    pub coord: TileCoord,
}

/// One resident tile: its GPU texture/view and its pixel-space placement.
pub struct Tile {
    pub coord: TileCoord,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub origin_x: i32,
    pub origin_y: i32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    fn new(device: &wgpu::Device, coord: TileCoord, tile_size: u32) -> Self {
        let (origin_x, origin_y) = coord.origin_px(tile_size);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tiles.tile_texture"),
            size: wgpu::Extent3d {
                width: tile_size,
                height: tile_size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            coord,
            texture,
            view,
            origin_x,
            origin_y,
            width: tile_size,
            height: tile_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileUploadError {
    StrideTooShort,
    BufferTooShort,
}

impl std::fmt::Display for TileUploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileUploadError::StrideTooShort => write!(f, "raster stride shorter than rect width * 4"),
            TileUploadError::BufferTooShort => write!(f, "raster buffer too short for stride * height"),
        }
    }
}

impl std::error::Error for TileUploadError {}

/// Sparse, per-layer tile storage, LRU-evicted under a shared byte budget.
pub struct TileStore {
    device: wgpu::Device,
    queue: wgpu::Queue,
    tile_size: u32,
    layers: HashMap<LayerId, HashMap<TileCoord, Tile>>,
    residency: ResidencyManager<TileSlotKey, ()>,
}

impl TileStore {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, budget_bytes: u64) -> Self {
        Self {
            device,
            queue,
            tile_size: TILE_SIZE,
            layers: HashMap::new(),
            residency: ResidencyManager::new(budget_bytes),
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn resident_bytes(&self) -> u64 {
        self.residency.resident_bytes()
    }

    pub fn budget_bytes(&self) -> u64 {
        self.residency.budget_bytes()
    }

    pub fn set_budget_bytes(&mut self, budget_bytes: u64) {
        self.residency.set_budget_bytes(budget_bytes);
        self.evict_over_budget();
    }

    pub fn tile_count(&self, layer: LayerId) -> usize {
        self.layers.get(&layer).map_or(0, HashMap::len)
    }

    pub fn get(&self, layer: LayerId, coord: TileCoord) -> Option<&Tile> {
        self.layers.get(&layer).and_then(|tiles| tiles.get(&coord))
    }

    /// Returns the tile at `coord`, allocating and evicting LRU neighbors as
    /// needed to stay within budget, and marking it most-recently-touched.
    pub fn get_or_create(&mut self, layer: LayerId, coord: TileCoord) -> &Tile {
        let key = TileSlotKey { layer, coord };
        if !self.layers.get(&layer).is_some_and(|tiles| tiles.contains_key(&coord)) {
            let tile = Tile::new(&self.device, coord, self.tile_size);
            self.layers.entry(layer).or_default().insert(coord, tile);
            self.residency.insert(key, (), tile_byte_size(self.tile_size));
            self.evict_over_budget();
        } else {
            self.residency.touch(&key);
        }
        self.layers
            .get(&layer)
            .and_then(|tiles| tiles.get(&coord))
            .expect("tile just inserted or already present")
    }

    fn evict_over_budget(&mut self) {
        for evicted in self.residency.evict_to_budget() {
            if let Some(tiles) = self.layers.get_mut(&evicted.key.layer) {
                tiles.remove(&evicted.key.coord);
                if tiles.is_empty() {
                    self.layers.remove(&evicted.key.layer);
                }
            }
        }
    }

    /// Drops every tile belonging to `layer` (e.g. on layer deletion).
    pub fn remove_layer(&mut self, layer: LayerId) {
        if let Some(tiles) = self.layers.remove(&layer) {
            for coord in tiles.keys() {
                self.residency.remove(&TileSlotKey { layer, coord: *coord });
            }
        }
    }

    /// Uploads `rect` of `raster` (tightly packed RGBA8, `raster_stride`
    /// bytes per row) into every tile it overlaps, allocating tiles as
    /// needed. `raster` is addressed in the same pixel-space `rect` is
    /// given in (i.e. `raster[0]` is the pixel at `rect.min_x, rect.min_y`).
    pub fn upload_rect(
        &mut self,
        layer: LayerId,
        rect: Rect,
        raster: &[u8],
        raster_stride: u32,
    ) -> Result<(), TileUploadError> {
        if rect.is_empty() {
            return Ok(());
        }
        if raster_stride < rect.width() * 4 {
            return Err(TileUploadError::StrideTooShort);
        }
        if raster.len() < (raster_stride as u64 * rect.height() as u64) as usize {
            return Err(TileUploadError::BufferTooShort);
        }

        for coord in rect_to_tile_coords(&rect, self.tile_size) {
            let tile_bounds = tile_rect(coord, self.tile_size);
            let draw_rect = rect.intersect(&tile_bounds);
            if draw_rect.is_empty() {
                continue;
            }
            self.get_or_create(layer, coord);
            let tile = self
                .layers
                .get(&layer)
                .and_then(|tiles| tiles.get(&coord))
                .expect("tile just created");

            let row_bytes = draw_rect.width() as usize * 4;
            let mut scratch = vec![0u8; row_bytes * draw_rect.height() as usize];
            for row in 0..draw_rect.height() {
                let src_y = (draw_rect.min_y - rect.min_y) as u32 + row;
                let src_x_bytes = (draw_rect.min_x - rect.min_x) as usize * 4;
                let src_start = src_y as usize * raster_stride as usize + src_x_bytes;
                let dst_start = row as usize * row_bytes;
                scratch[dst_start..dst_start + row_bytes]
                    .copy_from_slice(&raster[src_start..src_start + row_bytes]);
            }

            let dst_x = (draw_rect.min_x - tile_bounds.min_x) as u32;
            let dst_y = (draw_rect.min_y - tile_bounds.min_y) as u32;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &tile.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: dst_x,
                        y: dst_y,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &scratch,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes as u32),
                    rows_per_image: Some(draw_rect.height()),
                },
                wgpu::Extent3d {
                    width: draw_rect.width(),
                    height: draw_rect.height(),
                    depth_or_array_layers: 1,
                },
            );
        }
        Ok(())
    }

    /// Reads every resident tile of `layer` intersecting `rect` back into a
    /// tightly packed RGBA8 host raster covering exactly `rect`, honoring
    /// the 256-byte readback row-stride alignment internally. Tiles absent
    /// from the store contribute transparent-black pixels.
    pub fn readback_rect(&self, layer: LayerId, rect: Rect) -> Vec<u8> {
        let mut out = vec![0u8; rect.width() as usize * rect.height() as usize * 4];
        if rect.is_empty() {
            return out;
        }
        for coord in rect_to_tile_coords(&rect, self.tile_size) {
            let Some(tile) = self.get(layer, coord) else {
                continue;
            };
            let tile_bounds = tile_rect(coord, self.tile_size);
            let draw_rect = rect.intersect(&tile_bounds);
            if draw_rect.is_empty() {
                continue;
            }
            let aligned_bytes_per_row = align_up(draw_rect.width() * 4, 256);
            let buffer_size = aligned_bytes_per_row as u64 * draw_rect.height() as u64;
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tiles.readback"),
                size: buffer_size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tiles.readback_encoder"),
                });
            let src_x = (draw_rect.min_x - tile_bounds.min_x) as u32;
            let src_y = (draw_rect.min_y - tile_bounds.min_y) as u32;
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &tile.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: src_x,
                        y: src_y,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(aligned_bytes_per_row),
                        rows_per_image: Some(draw_rect.height()),
                    },
                },
                wgpu::Extent3d {
                    width: draw_rect.width(),
                    height: draw_rect.height(),
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(Some(encoder.finish()));

            let slice = buffer.slice(..);
            let (sender, receiver) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
            self.device
                .poll(wgpu::PollType::wait_indefinitely())
                .expect("device poll");
            receiver
                .recv()
                .expect("map_async channel closed")
                .expect("map_async failed");
            let mapped = slice.get_mapped_range();

            let dst_ox = (draw_rect.min_x - rect.min_x) as usize;
            let dst_oy = (draw_rect.min_y - rect.min_y) as usize;
            let row_bytes = draw_rect.width() as usize * 4;
            let out_stride = rect.width() as usize * 4;
            for row in 0..draw_rect.height() as usize {
                let src_start = row * aligned_bytes_per_row as usize;
                let dst_start = (dst_oy + row) * out_stride + dst_ox * 4;
                out[dst_start..dst_start + row_bytes]
                    .copy_from_slice(&mapped[src_start..src_start + row_bytes]);
            }
            drop(mapped);
            buffer.unmap();
        }
        out
    }
}

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod cpu_tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(1, 256), 256);
    }

    #[test]
    fn tile_byte_size_matches_rgba8_layout() {
        assert_eq!(tile_byte_size(256), 256 * 256 * 4);
    }
}

//! `SelectionMaskGpu`: a single-channel clipping mask that mirrors its
//! pixels in host memory so that dirty-rect commit clipping can be unit
//! tested without a GPU device, while still exposing a `R8Unorm` texture
//! for the compositor's commit-time clip sampling (spec §6 "Selection mask
//! clipping").

use stroke_geom::Rect;

pub struct SelectionMaskGpu {
    width: u32,
    height: u32,
    /// Host-side mirror, one byte per pixel, row-major, tightly packed.
    host: Vec<u8>,
    gpu: Option<GpuMask>,
}

struct GpuMask {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl SelectionMaskGpu {
    /// A mask with no GPU texture, fully selected (every sample reads 255).
    /// Useful for CPU-only tests and as the "no selection active" state.
    pub fn new_cpu_only(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            host: vec![255; (width as u64 * height as u64) as usize],
            gpu: None,
        }
    }

    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tiles.selection_mask"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            width,
            height,
            host: vec![255; (width as u64 * height as u64) as usize],
            gpu: Some(GpuMask { texture, view }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        self.gpu.as_ref().map(|g| &g.view)
    }

    /// Samples the host mirror at `(x, y)`, clamping to the mask bounds.
    /// This is what CPU-side dirty-rect clipping logic consults.
    pub fn sample(&self, x: i32, y: i32) -> u8 {
        let cx = x.clamp(0, self.width as i32 - 1) as u32;
        let cy = y.clamp(0, self.height as i32 - 1) as u32;
        self.host[(cy * self.width + cx) as usize]
    }

    /// Replaces the mask content within `rect` (tightly packed single-byte
    /// rows covering exactly `rect`), updating both the host mirror and, if
    /// present, the GPU texture.
    pub fn upload(&mut self, queue: &wgpu::Queue, rect: Rect, data: &[u8]) {
        let rect = rect.clamp_to_bounds(self.width, self.height);
        if rect.is_empty() {
            return;
        }
        debug_assert_eq!(data.len(), rect.width() as usize * rect.height() as usize);

        for row in 0..rect.height() {
            let src_start = row as usize * rect.width() as usize;
            let dst_y = (rect.min_y as u32 + row) as usize;
            let dst_start = dst_y * self.width as usize + rect.min_x as usize;
            self.host[dst_start..dst_start + rect.width() as usize]
                .copy_from_slice(&data[src_start..src_start + rect.width() as usize]);
        }

        if let Some(gpu) = &self.gpu {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: rect.min_x as u32,
                        y: rect.min_y as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(rect.width()),
                    rows_per_image: Some(rect.height()),
                },
                wgpu::Extent3d {
                    width: rect.width(),
                    height: rect.height(),
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// Resets the whole mask to fully selected.
    pub fn clear(&mut self, queue: &wgpu::Queue) {
        self.host.fill(255);
        if let Some(gpu) = &self.gpu {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &self.host,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.width),
                    rows_per_image: Some(self.height),
                },
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mask_is_fully_selected() {
        let mask = SelectionMaskGpu::new_cpu_only(4, 4);
        assert_eq!(mask.sample(0, 0), 255);
        assert_eq!(mask.sample(3, 3), 255);
    }

    #[test]
    fn sample_clamps_out_of_bounds_coordinates() {
        let mask = SelectionMaskGpu::new_cpu_only(4, 4);
        assert_eq!(mask.sample(-5, -5), mask.sample(0, 0));
        assert_eq!(mask.sample(99, 99), mask.sample(3, 3));
    }
}

//! `MaskPingPong`: the dual-mask accumulator's single-channel sibling of
//! [`crate::ping_pong::PingPongBuffer`] -- same swap/clear/copy shape, one
//! `r32float` channel instead of four, since the dual mask pipeline (spec
//! §4.4.3) only ever accumulates a scalar alpha mask.

use crate::ping_pong::TextureIdentitySource;
use stroke_geom::Rect;

const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

fn create_mask_texture(device: &wgpu::Device, width: u32, height: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: MASK_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

struct Slot {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    identity: u64,
}

impl Slot {
    fn new(device: &wgpu::Device, width: u32, height: u32, label: &str, identity: u64) -> Self {
        let texture = create_mask_texture(device, width, height, label);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, identity }
    }
}

pub struct MaskPingPong {
    a: Slot,
    b: Slot,
    source_is_a: bool,
    width: u32,
    height: u32,
}

impl MaskPingPong {
    pub fn new(device: &wgpu::Device, identities: &mut TextureIdentitySource, width: u32, height: u32) -> Self {
        Self {
            a: Slot::new(device, width, height, "accumulator.mask_ping_pong.a", identities.next()),
            b: Slot::new(device, width, height, "accumulator.mask_ping_pong.b", identities.next()),
            source_is_a: true,
            width,
            height,
        }
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn source_view(&self) -> &wgpu::TextureView {
        if self.source_is_a { &self.a.view } else { &self.b.view }
    }

    pub fn dest_view(&self) -> &wgpu::TextureView {
        if self.source_is_a { &self.b.view } else { &self.a.view }
    }

    pub fn source_identity(&self) -> u64 {
        if self.source_is_a { self.a.identity } else { self.b.identity }
    }

    pub fn dest_identity(&self) -> u64 {
        if self.source_is_a { self.b.identity } else { self.a.identity }
    }

    pub fn source_texture(&self) -> &wgpu::Texture {
        if self.source_is_a { &self.a.texture } else { &self.b.texture }
    }

    pub fn dest_texture(&self) -> &wgpu::Texture {
        if self.source_is_a { &self.b.texture } else { &self.a.texture }
    }

    pub fn swap(&mut self) {
        self.source_is_a = !self.source_is_a;
    }

    pub fn copy_source_to_dest(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.source_texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: self.dest_texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        for slot in [&self.a, &self.b] {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("accumulator.mask_ping_pong.clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &slot.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, identities: &mut TextureIdentitySource, width: u32, height: u32) {
        *self = Self::new(device, identities, width, height);
    }

    /// Sanity check used before dispatching into this mask: the dirty rect
    /// must lie within the mask's own texture bounds.
    pub fn contains(&self, rect: Rect) -> bool {
        rect.clamp_to_bounds(self.width, self.height) == rect
    }
}

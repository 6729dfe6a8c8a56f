//! `PingPongBuffer`: a pair of same-format floating-point textures with
//! swap, full-copy, and rectangular-copy operations, generalized from this
//! lineage's `GenericR32FloatTileAtlasStore` texture-allocation pattern down
//! to a plain pair of render-target-sized textures instead of a tile atlas.

use stroke_geom::Rect;

const ACCUMULATOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

fn create_accumulator_texture(device: &wgpu::Device, width: u32, height: u32, label: &str) -> wgpu::Texture {
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
        format: ACCUMULATOR_FORMAT,
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
        let texture = create_accumulator_texture(device, width, height, label);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            identity,
        }
    }
}

/// Monotonic counter handing out typed texture identities for bind-group
/// cache keys, replacing debug-label-keyed caches (spec redesign note).
#[derive(Default)]
pub struct TextureIdentitySource(u64);

impl TextureIdentitySource {
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

pub struct PingPongBuffer {
    a: Slot,
    b: Slot,
    source_is_a: bool,
    display: Option<Slot>,
    dual_blend_output: Option<Slot>,
    /// logical (unscaled) dimensions.
    logical_width: u32,
    logical_height: u32,
    render_scale: f32,
    /// texture (post render-scale) dimensions.
    texture_width: u32,
    texture_height: u32,
}

impl PingPongBuffer {
    pub fn new(
        device: &wgpu::Device,
        identities: &mut TextureIdentitySource,
        logical_width: u32,
        logical_height: u32,
        render_scale: f32,
    ) -> Self {
        let (texture_width, texture_height) = scaled_dims(logical_width, logical_height, render_scale);
        Self {
            a: Slot::new(device, texture_width, texture_height, "accumulator.ping_pong.a", identities.next()),
            b: Slot::new(device, texture_width, texture_height, "accumulator.ping_pong.b", identities.next()),
            source_is_a: true,
            display: None,
            dual_blend_output: None,
            logical_width,
            logical_height,
            render_scale,
            texture_width,
            texture_height,
        }
    }

    pub fn texture_dims(&self) -> (u32, u32) {
        (self.texture_width, self.texture_height)
    }

    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    pub fn source_view(&self) -> &wgpu::TextureView {
        if self.source_is_a {
            &self.a.view
        } else {
            &self.b.view
        }
    }

    pub fn dest_view(&self) -> &wgpu::TextureView {
        if self.source_is_a {
            &self.b.view
        } else {
            &self.a.view
        }
    }

    pub fn source_texture(&self) -> &wgpu::Texture {
        if self.source_is_a {
            &self.a.texture
        } else {
            &self.b.texture
        }
    }

    pub fn dest_texture(&self) -> &wgpu::Texture {
        if self.source_is_a {
            &self.b.texture
        } else {
            &self.a.texture
        }
    }

    pub fn source_identity(&self) -> u64 {
        if self.source_is_a {
            self.a.identity
        } else {
            self.b.identity
        }
    }

    pub fn dest_identity(&self) -> u64 {
        if self.source_is_a {
            self.b.identity
        } else {
            self.a.identity
        }
    }

    pub fn swap(&mut self) {
        self.source_is_a = !self.source_is_a;
    }

    pub fn ensure_display(&mut self, device: &wgpu::Device, identities: &mut TextureIdentitySource) -> u64 {
        if self.display.is_none() {
            self.display = Some(Slot::new(
                device,
                self.texture_width,
                self.texture_height,
                "accumulator.ping_pong.display",
                identities.next(),
            ));
        }
        self.display.as_ref().expect("display just ensured").identity
    }

    pub fn display_view(&self) -> Option<&wgpu::TextureView> {
        self.display.as_ref().map(|slot| &slot.view)
    }

    pub fn display_texture(&self) -> Option<&wgpu::Texture> {
        self.display.as_ref().map(|slot| &slot.texture)
    }

    pub fn display_identity(&self) -> Option<u64> {
        self.display.as_ref().map(|slot| slot.identity)
    }

    /// Lazily allocates the dual-blend-output texture: the surface
    /// `dispatch_dual_blend` writes into, distinct from `display` so a
    /// following wet-edge pass can read one while writing the other.
    pub fn ensure_dual_blend_output(&mut self, device: &wgpu::Device, identities: &mut TextureIdentitySource) -> u64 {
        if self.dual_blend_output.is_none() {
            self.dual_blend_output = Some(Slot::new(
                device,
                self.texture_width,
                self.texture_height,
                "accumulator.ping_pong.dual_blend_output",
                identities.next(),
            ));
        }
        self.dual_blend_output.as_ref().expect("dual blend output just ensured").identity
    }

    pub fn dual_blend_output_view(&self) -> Option<&wgpu::TextureView> {
        self.dual_blend_output.as_ref().map(|slot| &slot.view)
    }

    pub fn dual_blend_output_texture(&self) -> Option<&wgpu::Texture> {
        self.dual_blend_output.as_ref().map(|slot| &slot.texture)
    }

    pub fn dual_blend_output_identity(&self) -> Option<u64> {
        self.dual_blend_output.as_ref().map(|slot| slot.identity)
    }

    /// Copies the whole source texture into dest, left-over-right; used
    /// before a partial-rect compute dispatch so untouched pixels persist.
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
                width: self.texture_width,
                height: self.texture_height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Copies the sub-rect of `source` to `dest`, scaling `rect` by the
    /// current render scale and clamping to texture bounds. A no-op for an
    /// empty (or render-scaled-to-empty) rect.
    pub fn copy_rect(&self, encoder: &mut wgpu::CommandEncoder, rect: Rect) {
        let scaled = rect
            .scale_outward(self.render_scale)
            .clamp_to_bounds(self.texture_width, self.texture_height);
        if scaled.is_empty() {
            return;
        }
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.source_texture(),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: scaled.min_x as u32,
                    y: scaled.min_y as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: self.dest_texture(),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: scaled.min_x as u32,
                    y: scaled.min_y as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: scaled.width(),
                height: scaled.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    /// Clears both textures (and the display texture, if allocated) to
    /// transparent black via a render pass.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        for slot in [
            Some(&self.a),
            Some(&self.b),
            self.display.as_ref(),
            self.dual_blend_output.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("accumulator.ping_pong.clear"),
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

    /// Releases both textures (and the display texture) and reallocates at
    /// `ceil(w*scale) x ceil(h*scale)`. Callers must clear bind-group caches
    /// that referenced the old identities.
    pub fn resize(
        &mut self,
        device: &wgpu::Device,
        identities: &mut TextureIdentitySource,
        logical_width: u32,
        logical_height: u32,
        render_scale: f32,
    ) {
        let (texture_width, texture_height) = scaled_dims(logical_width, logical_height, render_scale);
        *self = Self::new(device, identities, logical_width, logical_height, render_scale);
        debug_assert_eq!((self.texture_width, self.texture_height), (texture_width, texture_height));
    }

    pub fn logical_dims(&self) -> (u32, u32) {
        (self.logical_width, self.logical_height)
    }
}

fn scaled_dims(logical_width: u32, logical_height: u32, render_scale: f32) -> (u32, u32) {
    (
        ((logical_width as f32) * render_scale).ceil().max(1.0) as u32,
        ((logical_height as f32) * render_scale).ceil().max(1.0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dims_ceils_and_floors_to_at_least_one() {
        assert_eq!(scaled_dims(1000, 800, 0.5), (500, 400));
        assert_eq!(scaled_dims(3, 3, 0.5), (2, 2));
        assert_eq!(scaled_dims(0, 0, 1.0), (1, 1));
    }
}

//! `StrokeAccumulator`: the orchestrator of spec §4.5. Owns the primary
//! ping-pong pair, the dual-mask ping-pong pair, both dab kinds' instance
//! buffers (primary and secondary), the five compute pipelines, and the
//! stroke lifecycle state machine, generalized from this lineage's
//! `Renderer` top-level struct (`renderer::renderer_init::Renderer`), which
//! plays the same "owns every GPU resource, drives one frame/stroke at a
//! time" role for a render loop instead of a stroke.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stroke_geom::{auto_render_scale, effective_radius, Rect};
use stroke_protocol::{
    BrushMode, ColorBlendMode, DualBlendMode, DualBlendUniforms, DualBrushSettings, DualMaskUniforms,
    GpuDabParams, ParametricDabUniforms, PatternSettings, TexturedDabUniforms, WetEdgeUniforms,
};

use crate::dispatch_support::DispatchError;
use crate::instance_buffer::{DabExtra, InstanceBuffer};
use crate::mask_ping_pong::MaskPingPong;
use crate::modulation_textures::{create_erf_lut_texture, create_noise_texture};
use crate::pipelines::{DualBlendPipeline, DualMaskPipeline, ParametricDabPipeline, TexturedDabPipeline, WetEdgePipeline};
use crate::ping_pong::{PingPongBuffer, TextureIdentitySource};
use crate::texture_cache::{DecodedRaster, TextureCache, TextureKey};
use crate::tile_builder::build_dispatch_tiles;
use stroke_protocol::{DabParametricGpu, DabTexturedGpu};

const DIRTY_RECT_MARGIN_TEXELS: i32 = 2;
const WHITE_PIXEL_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Active,
    EndingPrepare,
    EndingCommit,
}

/// The readback guard of spec §9: idle, a readback in flight, or a retry
/// pending because a new flush landed while one was in flight. Readback in
/// this crate is performed synchronously (it blocks on `device.poll` the
/// way `tiles::TileStore::readback_rect` does), so in practice a call to
/// `flush` never observes `InFlight` from a previous call; the state is
/// kept so a host that later wires an async executor around this crate has
/// something to drive off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewReadbackState {
    Idle,
    InFlight,
    RetryPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScaleMode {
    Auto,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeAccumulatorConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub render_scale_mode: RenderScaleMode,
    pub wet_edge_enabled: bool,
    pub wet_edge_hardness: f32,
    pub wet_edge_strength: f32,
    pub color_blend_mode: ColorBlendMode,
    pub dual_blend_mode: DualBlendMode,
    /// Intensity of the procedural noise overlay (spec §4.4.2) applied when a
    /// dab's `noise_enabled` flag is set; `GpuDabParams` carries no per-dab
    /// strength, so this is the accumulator-level knob, mirroring
    /// `wet_edge_strength`.
    pub noise_strength: f32,
}

impl Default for StrokeAccumulatorConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1,
            canvas_height: 1,
            render_scale_mode: RenderScaleMode::Off,
            wet_edge_enabled: false,
            wet_edge_hardness: 0.5,
            wet_edge_strength: 0.0,
            color_blend_mode: ColorBlendMode::Srgb,
            dual_blend_mode: DualBlendMode::Multiply,
            noise_strength: 0.5,
        }
    }
}

/// A committed stroke's rasterized dirty region, handed to the compositor.
pub struct CommittedStroke {
    pub dirty_rect: Rect,
    pub preview_rgba: Vec<u8>,
}

pub struct StrokeAccumulator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    identities: TextureIdentitySource,

    primary: PingPongBuffer,
    dual_mask: Option<MaskPingPong>,

    parametric_instances: InstanceBuffer<DabParametricGpu>,
    textured_instances: InstanceBuffer<DabTexturedGpu>,
    dual_parametric_instances: InstanceBuffer<DabParametricGpu>,
    dual_textured_instances: InstanceBuffer<DabTexturedGpu>,

    parametric_pipeline: ParametricDabPipeline,
    textured_pipeline: TexturedDabPipeline,
    dual_mask_pipeline: DualMaskPipeline,
    dual_blend_pipeline: DualBlendPipeline,
    wet_edge_pipeline: WetEdgePipeline,

    white_pixel: (wgpu::TextureView, u64),
    brush_tip_cache: TextureCache,
    current_brush_tip_key: Option<u64>,
    pattern_cache: TextureCache,
    noise_texture: (wgpu::TextureView, u64),
    erf_lut: (wgpu::TextureView, u64),

    state: AccumulatorState,
    mode: Option<BrushMode>,
    dirty_rect: Rect,
    dual_dirty_rect: Rect,
    dabs_since_flush: u32,
    pending_pattern: PatternSettings,
    pending_noise_enabled: bool,

    dual_mask_active: bool,
    dual_post_pending: bool,

    config: StrokeAccumulatorConfig,
    render_scale: f32,

    device_lost: Arc<AtomicBool>,
    fallback_mailbox: Option<String>,
    preview_state: PreviewReadbackState,
    preview_rgba: Vec<u8>,

    trace_enabled: bool,
}

impl StrokeAccumulator {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: StrokeAccumulatorConfig, trace_enabled: bool) -> Self {
        let mut identities = TextureIdentitySource::default();
        let primary = PingPongBuffer::new(&device, &mut identities, config.canvas_width, config.canvas_height, 1.0);

        let white_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("accumulator.white_pixel"),
            size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &white_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        let white_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let white_identity = identities.next();

        let noise_view = create_noise_texture(&device, &queue);
        let noise_identity = identities.next();
        let erf_lut_view = create_erf_lut_texture(&device, &queue);
        let erf_lut_identity = identities.next();

        let parametric_pipeline = ParametricDabPipeline::new(&device);
        let textured_pipeline = TexturedDabPipeline::new(&device);
        let dual_mask_pipeline = DualMaskPipeline::new(&device);
        let dual_blend_pipeline = DualBlendPipeline::new(&device);
        let wet_edge_pipeline = WetEdgePipeline::new(&device);

        let device_lost = Arc::new(AtomicBool::new(false));
        let lost_flag = device_lost.clone();
        device.set_device_lost_callback(Box::new(move |_reason, _message| {
            lost_flag.store(true, Ordering::SeqCst);
        }));

        Self {
            device,
            queue,
            identities,
            primary,
            dual_mask: None,
            parametric_instances: InstanceBuffer::new(),
            textured_instances: InstanceBuffer::new(),
            dual_parametric_instances: InstanceBuffer::new(),
            dual_textured_instances: InstanceBuffer::new(),
            parametric_pipeline,
            textured_pipeline,
            dual_mask_pipeline,
            dual_blend_pipeline,
            wet_edge_pipeline,
            white_pixel: (white_view, white_identity),
            brush_tip_cache: TextureCache::new(),
            current_brush_tip_key: None,
            pattern_cache: TextureCache::new(),
            noise_texture: (noise_view, noise_identity),
            erf_lut: (erf_lut_view, erf_lut_identity),
            state: AccumulatorState::Idle,
            mode: None,
            dirty_rect: Rect::EMPTY,
            dual_dirty_rect: Rect::EMPTY,
            dabs_since_flush: 0,
            pending_pattern: PatternSettings::NONE,
            pending_noise_enabled: false,
            dual_mask_active: false,
            dual_post_pending: false,
            config,
            render_scale: 1.0,
            device_lost,
            fallback_mailbox: None,
            preview_state: PreviewReadbackState::Idle,
            preview_rgba: vec![0u8; config.canvas_width as usize * config.canvas_height as usize * 4],
            trace_enabled,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AccumulatorState::Active
    }

    pub fn dirty_rect(&self) -> Rect {
        self.dirty_rect
    }

    pub fn consume_fallback_request(&mut self) -> Option<String> {
        self.fallback_mailbox.take()
    }

    /// Whether the wired `device_lost_callback` has fired. Exposed so a host
    /// facade can subscribe to device loss without polling dispatch results.
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::SeqCst)
    }

    /// Uploads a decoded brush-tip raster under `key`, available to later
    /// `stamp_dab` calls that reference it via `GpuDabParams::brush_tip_key`.
    pub fn set_brush_tip(&mut self, key: u64, raster: &DecodedRaster) {
        self.brush_tip_cache.set(&self.device, &self.queue, TextureKey(key), raster);
    }

    /// Uploads a decoded pattern raster under `key`, available to later
    /// `stamp_dab` calls whose `GpuDabParams::pattern` references it via
    /// `PatternSettings::pattern_id`.
    pub fn set_pattern(&mut self, key: u64, raster: &DecodedRaster) {
        self.pattern_cache.set(&self.device, &self.queue, TextureKey(key), raster);
    }

    pub fn set_dual_brush_state(&mut self, enabled: bool, blend_mode: Option<DualBlendMode>) {
        self.dual_mask_active = enabled;
        if let Some(mode) = blend_mode {
            self.config.dual_blend_mode = mode;
        }
        if !enabled {
            self.dual_dirty_rect = Rect::EMPTY;
            self.dual_post_pending = false;
        }
    }

    fn trace(&self, message: &str) {
        if self.trace_enabled {
            eprintln!("[stroke_trace] {message}");
        }
    }

    fn device_lost_now(&mut self) -> bool {
        if self.device_lost.load(Ordering::SeqCst) {
            if self.dual_mask_active {
                self.fallback_mailbox = Some("device lost while a dual-brush stroke was active".to_owned());
            }
            self.trace("device lost; suppressing further dispatch");
            true
        } else {
            false
        }
    }

    /// Resets both accumulator textures and clears stroke state; transitions
    /// Idle -> Active (spec §4.5 `begin_stroke`).
    pub fn begin_stroke(&mut self) {
        if self.device_lost_now() {
            return;
        }
        self.render_scale = match self.config.render_scale_mode {
            RenderScaleMode::Off => 1.0,
            RenderScaleMode::Auto => 1.0, // refined once the first dab reveals tip size; see stamp_dab.
        };
        self.mode = None;
        self.dirty_rect = Rect::EMPTY;
        self.dual_dirty_rect = Rect::EMPTY;
        self.dabs_since_flush = 0;
        self.pending_pattern = PatternSettings::NONE;
        self.pending_noise_enabled = false;
        self.dual_post_pending = false;
        self.parametric_instances.clear();
        self.textured_instances.clear();
        self.dual_parametric_instances.clear();
        self.dual_textured_instances.clear();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("accumulator.begin_stroke.clear"),
        });
        self.primary.clear(&mut encoder);
        if let Some(dual) = &self.dual_mask {
            dual.clear(&mut encoder);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.state = AccumulatorState::Active;
        self.trace("begin_stroke");
    }

    /// Active -> Idle; discards staged dabs without flushing.
    pub fn abort_stroke(&mut self) {
        self.clear();
        self.trace("abort_stroke");
    }

    pub fn clear(&mut self) {
        self.parametric_instances.clear();
        self.textured_instances.clear();
        self.dual_parametric_instances.clear();
        self.dual_textured_instances.clear();
        self.mode = None;
        self.dirty_rect = Rect::EMPTY;
        self.dual_dirty_rect = Rect::EMPTY;
        self.dabs_since_flush = 0;
        self.dual_post_pending = false;
        self.state = AccumulatorState::Idle;
    }

    fn ensure_dual_mask(&mut self) {
        if self.dual_mask.is_none() {
            let (w, h) = self.primary.texture_dims();
            self.dual_mask = Some(MaskPingPong::new(&self.device, &mut self.identities, w, h));
        }
    }

    /// Stamps a primary dab (spec §4.5 `stamp_dab`). A no-op while idle or
    /// when the dab's mode disagrees with the mode fixed by the stroke's
    /// first dab (both are the "silently ignored" precondition violations
    /// of spec §7).
    pub fn stamp_dab(&mut self, params: &GpuDabParams) {
        if self.state != AccumulatorState::Active || self.device_lost_now() {
            return;
        }
        let mode = params.mode();
        match self.mode {
            None => {
                self.mode = Some(mode);
                if self.config.render_scale_mode == RenderScaleMode::Auto {
                    self.render_scale = auto_render_scale(params.size * 0.5, params.hardness, mode == BrushMode::Textured);
                    self.resize_textures_for_render_scale();
                }
            }
            Some(active_mode) if active_mode != mode => {
                self.trace("stamp_dab: mode mismatch, ignored");
                return;
            }
            _ => {}
        }

        if let Some(pattern) = &params.pattern {
            if *pattern != self.pending_pattern {
                let _ = self.flush();
                self.pending_pattern = *pattern;
            }
            if pattern.pattern_id != 0 && !self.pattern_cache.try_set_current(TextureKey(pattern.pattern_id)) {
                self.fallback_mailbox = Some(format!("pattern {} is not resident; request a CPU fallback dab", pattern.pattern_id));
                self.trace("stamp_dab: pattern not resident, requesting fallback");
                return;
            }
        }

        if params.noise_enabled != self.pending_noise_enabled {
            let _ = self.flush();
            self.pending_noise_enabled = params.noise_enabled;
        }

        if mode == BrushMode::Textured {
            if params.brush_tip_key != self.current_brush_tip_key {
                let _ = self.flush();
                self.current_brush_tip_key = params.brush_tip_key;
            }
            let key = params.brush_tip_key.expect("textured mode implies a brush tip key");
            if !self.brush_tip_cache.try_set_current(TextureKey(key)) {
                self.fallback_mailbox = Some(format!("brush tip {key} is not resident; request a CPU fallback dab"));
                self.trace("stamp_dab: brush tip not resident, requesting fallback");
                return;
            }
        }

        let color = match params.color_rgb() {
            Ok(rgb) => rgb,
            Err(_) => {
                self.trace("stamp_dab: invalid color hex, ignored");
                return;
            }
        };

        let scale = self.render_scale;
        let x = params.x * scale;
        let y = params.y * scale;
        let radius = params.size * 0.5 * scale;
        let extra = DabExtra {
            color,
            dab_opacity: params.effective_dab_opacity(),
            flow: params.flow,
            roundness: params.roundness,
            angle_radians: params.angle_degrees.to_radians(),
            size_or_diameter: params.size * scale,
        };

        match mode {
            BrushMode::Parametric => self.parametric_instances.push(x, y, radius, params.hardness, extra),
            BrushMode::Textured => self.textured_instances.push(x, y, radius, params.hardness, extra),
        }

        let reach = effective_radius(radius, params.hardness);
        let dab_rect = Rect::from_center_radius(x, y, reach).expand(DIRTY_RECT_MARGIN_TEXELS);
        self.dirty_rect = self.dirty_rect.union(&dab_rect);

        self.dabs_since_flush += 1;
        if self.dabs_since_flush >= stroke_protocol::limits::AUTO_FLUSH_DAB_THRESHOLD {
            let _ = self.flush();
        }
    }

    /// Contributes a scattered dab to the dual-mask accumulator (spec §4.5
    /// `stamp_secondary_dab`).
    pub fn stamp_secondary_dab(&mut self, x: f32, y: f32, size: f32, settings: &DualBrushSettings, stroke_angle_degrees: f32) {
        if self.state != AccumulatorState::Active || self.device_lost_now() {
            return;
        }
        self.ensure_dual_mask();
        let Some(mode) = self.mode else { return };
        let scale = self.render_scale;
        let count = if settings.count_control_off { 1 } else { settings.count.max(1) };

        for i in 0..count {
            let jitter = if settings.count_jitter != 0.0 {
                (i as f32 / count.max(1) as f32 - 0.5) * settings.count_jitter
            } else {
                0.0
            };
            let scatter = if settings.scatter_control_off { 0.0 } else { settings.scatter_amount };
            let (dx, dy) = if settings.both_axes {
                (scatter * jitter, scatter * jitter)
            } else {
                (scatter * jitter, 0.0)
            };
            let px = (x + dx) * scale;
            let py = (y + dy) * scale;
            let radius = size * 0.5 * scale;
            let extra = DabExtra {
                color: WHITE_PIXEL_COLOR,
                dab_opacity: 1.0,
                flow: 1.0,
                roundness: 1.0,
                angle_radians: stroke_angle_degrees.to_radians(),
                size_or_diameter: size * scale,
            };
            match mode {
                BrushMode::Parametric => self.dual_parametric_instances.push(px, py, radius, 1.0, extra),
                BrushMode::Textured => self.dual_textured_instances.push(px, py, radius, 1.0, extra),
            }
            let reach = effective_radius(radius, 1.0);
            let dab_rect = Rect::from_center_radius(px, py, reach).expand(DIRTY_RECT_MARGIN_TEXELS);
            self.dual_dirty_rect = self.dual_dirty_rect.union(&dab_rect);
        }
    }

    fn resize_textures_for_render_scale(&mut self) {
        let (logical_w, logical_h) = self.primary.logical_dims();
        self.primary.resize(&self.device, &mut self.identities, logical_w, logical_h, self.render_scale);
        if let Some(dual) = &mut self.dual_mask {
            let (w, h) = self.primary.texture_dims();
            dual.resize(&self.device, &mut self.identities, w, h);
        }
        self.parametric_pipeline.clear_bind_group_cache();
        self.textured_pipeline.clear_bind_group_cache();
        self.dual_mask_pipeline.clear_bind_group_cache();
        self.dual_blend_pipeline.clear_bind_group_cache();
        self.wet_edge_pipeline.clear_bind_group_cache();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.canvas_width = width;
        self.config.canvas_height = height;
        self.primary.resize(&self.device, &mut self.identities, width, height, self.render_scale);
        self.dual_mask = None;
        self.preview_rgba = vec![0u8; width as usize * height as usize * 4];
        self.parametric_pipeline.clear_bind_group_cache();
        self.textured_pipeline.clear_bind_group_cache();
        self.dual_mask_pipeline.clear_bind_group_cache();
        self.dual_blend_pipeline.clear_bind_group_cache();
        self.wet_edge_pipeline.clear_bind_group_cache();
    }

    /// Dispatches all pending work and schedules a preview readback (spec
    /// §4.5 `flush`).
    pub fn flush(&mut self) -> Result<(), DispatchError> {
        if self.device_lost_now() {
            return Err(DispatchError::DeviceLost);
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("accumulator.flush"),
        });

        let mut primary_dispatched = false;
        match self.mode {
            Some(BrushMode::Parametric) => {
                if !self.parametric_instances.is_empty() {
                    primary_dispatched = self.dispatch_parametric(&mut encoder)?;
                }
            }
            Some(BrushMode::Textured) => {
                if !self.textured_instances.is_empty() {
                    primary_dispatched = self.dispatch_textured(&mut encoder)?;
                }
            }
            None => {}
        }

        let mut secondary_dispatched = false;
        if self.dual_mask_active {
            secondary_dispatched = self.dispatch_dual_mask(&mut encoder)?;
        }

        if self.dual_mask_active {
            if primary_dispatched || secondary_dispatched || self.dual_post_pending {
                self.dispatch_dual_blend(&mut encoder);
                self.dual_post_pending = false;
                if self.config.wet_edge_enabled && self.config.wet_edge_strength > 0.01 {
                    self.dispatch_wet_edge_from_dual_blend(&mut encoder);
                }
            }
        } else if primary_dispatched && self.config.wet_edge_enabled && self.config.wet_edge_strength > 0.01 {
            self.dispatch_wet_edge(&mut encoder);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.dabs_since_flush = 0;
        self.schedule_preview_readback();
        Ok(())
    }

    fn dispatch_parametric(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<bool, DispatchError> {
        let count = self.parametric_instances.pending() as u32;
        let bbox = self.parametric_instances.bounding_box();
        let flushed = self.parametric_instances.flush(&self.device, &self.queue, "accumulator.parametric.instances", stroke_protocol::limits::MAX_DABS_PER_BATCH)
            .map_err(|_| DispatchError::TooManyDabs { count: count as usize, limit: stroke_protocol::limits::MAX_DABS_PER_BATCH })?;
        let Some(_) = flushed else { return Ok(false) };
        let Some(buffer) = self.parametric_instances.gpu_buffer() else { return Ok(false) };

        self.primary.copy_source_to_dest(encoder);
        let (tex_w, tex_h) = self.primary.texture_dims();
        let rect = bbox.scale_outward(1.0).clamp_to_bounds(tex_w, tex_h);
        let tiles = build_dispatch_tiles(rect).map_err(|err| DispatchError::TooManyTiles {
            count: match err { crate::tile_builder::TileBuildError::TooManyTiles { count, .. } => count },
            limit: stroke_protocol::limits::MAX_TILES_PER_DISPATCH,
        })?;

        let pattern_active = self.pending_pattern.pattern_id != 0;
        let (pattern_view, pattern_identity, pattern_dims) = if pattern_active {
            match self.pattern_cache.get_current() {
                Some((view, identity)) => (view, identity, self.pattern_cache.get_current_dims().unwrap_or((1, 1))),
                None => (&self.white_pixel.0, self.white_pixel.1, (1, 1)),
            }
        } else {
            (&self.white_pixel.0, self.white_pixel.1, (1, 1))
        };
        let noise_active = self.pending_noise_enabled;

        let uniforms = ParametricDabUniforms {
            tile_offset: [0, 0],
            tile_size: [0, 0],
            canvas_size: [tex_w, tex_h],
            dab_count: count,
            color_blend_mode: self.config.color_blend_mode.to_u32(),
            pattern_enabled: pattern_active as u32,
            pattern_scale: self.pending_pattern.scale_pct,
            pattern_brightness: self.pending_pattern.brightness,
            pattern_contrast: self.pending_pattern.contrast,
            pattern_depth: self.pending_pattern.depth,
            pattern_invert: self.pending_pattern.invert as u32,
            pattern_blend_mode: self.pending_pattern.blend_mode,
            pattern_texel_w: 1.0 / pattern_dims.0 as f32,
            pattern_texel_h: 1.0 / pattern_dims.1 as f32,
            noise_enabled: noise_active as u32,
            noise_strength: self.config.noise_strength,
            alpha_ceiling: 1.0,
            _reserved0: [0.0; 4],
            _reserved1: [0.0; 4],
        };
        self.parametric_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            self.primary.source_view(),
            self.primary.dest_view(),
            self.primary.source_identity(),
            self.primary.dest_identity(),
            buffer,
            count,
            pattern_view,
            pattern_identity,
            &self.noise_texture.0,
            self.noise_texture.1,
            &self.erf_lut.0,
            self.erf_lut.1,
            &tiles,
            uniforms,
        )?;
        self.primary.swap();
        Ok(true)
    }

    fn dispatch_textured(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<bool, DispatchError> {
        let count = self.textured_instances.pending() as u32;
        let bbox = self.textured_instances.bounding_box();
        let flushed = self.textured_instances.flush(&self.device, &self.queue, "accumulator.textured.instances", stroke_protocol::limits::MAX_DABS_PER_BATCH)
            .map_err(|_| DispatchError::TooManyDabs { count: count as usize, limit: stroke_protocol::limits::MAX_DABS_PER_BATCH })?;
        let Some(_) = flushed else { return Ok(false) };
        let Some(buffer) = self.textured_instances.gpu_buffer() else { return Ok(false) };

        self.primary.copy_source_to_dest(encoder);
        let (tex_w, tex_h) = self.primary.texture_dims();
        let rect = bbox.clamp_to_bounds(tex_w, tex_h);
        let tiles = build_dispatch_tiles(rect).map_err(|err| DispatchError::TooManyTiles {
            count: match err { crate::tile_builder::TileBuildError::TooManyTiles { count, .. } => count },
            limit: stroke_protocol::limits::MAX_TILES_PER_DISPATCH,
        })?;

        let pattern_active = self.pending_pattern.pattern_id != 0;
        let (pattern_view, pattern_identity) = if pattern_active {
            self.pattern_cache.get_current().unwrap_or((&self.white_pixel.0, self.white_pixel.1))
        } else {
            (&self.white_pixel.0, self.white_pixel.1)
        };
        let noise_active = self.pending_noise_enabled;

        let uniforms = TexturedDabUniforms {
            tile_offset: [0, 0],
            tile_size: [0, 0],
            canvas_size: [tex_w, tex_h],
            dab_count: count,
            color_blend_mode: self.config.color_blend_mode.to_u32(),
            pattern_enabled: pattern_active as u32,
            pattern_scale: self.pending_pattern.scale_pct,
            pattern_brightness: self.pending_pattern.brightness,
            pattern_contrast: self.pending_pattern.contrast,
            pattern_depth: self.pending_pattern.depth,
            pattern_invert: self.pending_pattern.invert as u32,
            pattern_blend_mode: self.pending_pattern.blend_mode,
            alpha_ceiling: 1.0,
            noise_enabled: noise_active as u32,
            noise_strength: self.config.noise_strength,
            _reserved: [0.0; 2],
        };
        let (brush_view, brush_identity) = self
            .brush_tip_cache
            .get_current()
            .unwrap_or((&self.white_pixel.0, self.white_pixel.1));
        self.textured_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            self.primary.source_view(),
            self.primary.dest_view(),
            self.primary.source_identity(),
            self.primary.dest_identity(),
            buffer,
            count,
            brush_view,
            brush_identity,
            pattern_view,
            pattern_identity,
            &self.noise_texture.0,
            self.noise_texture.1,
            &tiles,
            uniforms,
        )?;
        self.primary.swap();
        Ok(true)
    }

    fn dispatch_dual_mask(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<bool, DispatchError> {
        let Some(mode) = self.mode else { return Ok(false) };
        self.ensure_dual_mask();
        let (buffer, count, bbox) = match mode {
            BrushMode::Parametric => {
                let count = self.dual_parametric_instances.pending() as u32;
                let bbox = self.dual_parametric_instances.bounding_box();
                if self.dual_parametric_instances.flush(&self.device, &self.queue, "accumulator.dual.parametric.instances", stroke_protocol::limits::MAX_DABS_PER_BATCH)
                    .map_err(|_| DispatchError::TooManyDabs { count: count as usize, limit: stroke_protocol::limits::MAX_DABS_PER_BATCH })?
                    .is_none()
                {
                    return Ok(false);
                }
                (self.dual_parametric_instances.gpu_buffer().expect("just flushed").clone(), count, bbox)
            }
            BrushMode::Textured => {
                let count = self.dual_textured_instances.pending() as u32;
                let bbox = self.dual_textured_instances.bounding_box();
                if self.dual_textured_instances.flush(&self.device, &self.queue, "accumulator.dual.textured.instances", stroke_protocol::limits::MAX_DABS_PER_BATCH)
                    .map_err(|_| DispatchError::TooManyDabs { count: count as usize, limit: stroke_protocol::limits::MAX_DABS_PER_BATCH })?
                    .is_none()
                {
                    return Ok(false);
                }
                (self.dual_textured_instances.gpu_buffer().expect("just flushed").clone(), count, bbox)
            }
        };

        let dual = self.dual_mask.as_ref().expect("ensured above");
        let (w, h) = dual.dims();
        dual.copy_source_to_dest(encoder);
        let rect = bbox.clamp_to_bounds(w, h);
        let tiles = build_dispatch_tiles(rect).map_err(|err| DispatchError::TooManyTiles {
            count: match err { crate::tile_builder::TileBuildError::TooManyTiles { count, .. } => count },
            limit: stroke_protocol::limits::MAX_TILES_PER_DISPATCH,
        })?;
        let uniforms = DualMaskUniforms {
            tile_offset: [0, 0],
            tile_size: [0, 0],
            canvas_size: [w, h],
            dab_count: count,
            alpha_ceiling: 1.0,
        };
        self.dual_mask_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            dual.dest_view(),
            dual.source_view(),
            dual.dest_identity(),
            dual.source_identity(),
            &buffer,
            count,
            &tiles,
            uniforms,
        )?;
        self.dual_mask.as_mut().expect("ensured above").swap();
        Ok(true)
    }

    fn dispatch_dual_blend(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let Some(dual) = &self.dual_mask else { return };
        let (tex_w, tex_h) = self.primary.texture_dims();
        let rect = self.dirty_rect.union(&self.dual_dirty_rect).clamp_to_bounds(tex_w, tex_h);
        if rect.is_empty() {
            return;
        }
        self.primary.ensure_dual_blend_output(&self.device, &mut self.identities);
        let uniforms = DualBlendUniforms {
            dirty_offset: [rect.min_x as u32, rect.min_y as u32],
            dirty_size: [rect.width(), rect.height()],
            canvas_size: [tex_w, tex_h],
            blend_mode: self.config.dual_blend_mode.to_u32(),
            _reserved: 0,
        };
        self.dual_blend_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            self.primary.source_view(),
            dual.source_view(),
            self.primary.dual_blend_output_view().expect("dual blend output ensured"),
            self.primary.source_identity(),
            dual.source_identity(),
            self.primary.dual_blend_output_identity().expect("dual blend output ensured"),
            uniforms,
        );
    }

    fn dispatch_wet_edge(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let (tex_w, tex_h) = self.primary.texture_dims();
        let rect = self.dirty_rect.clamp_to_bounds(tex_w, tex_h);
        if rect.is_empty() {
            return;
        }
        self.primary.ensure_display(&self.device, &mut self.identities);
        let uniforms = WetEdgeUniforms {
            dirty_offset: [rect.min_x as u32, rect.min_y as u32],
            dirty_size: [rect.width(), rect.height()],
            canvas_size: [tex_w, tex_h],
            hardness: self.config.wet_edge_hardness,
            strength: self.config.wet_edge_strength,
        };
        self.wet_edge_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            self.primary.source_view(),
            self.primary.display_view().expect("display ensured"),
            self.primary.source_identity(),
            self.primary.display_identity().expect("display ensured"),
            uniforms,
        );
    }

    /// The post-dual wet-edge pass (spec §4.5): reads the dual-blend output
    /// `dispatch_dual_blend` just wrote, not the raw accumulator, since the
    /// raw accumulator never saw the dual-brush blend.
    fn dispatch_wet_edge_from_dual_blend(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if self.primary.dual_blend_output_view().is_none() {
            return;
        }
        let (tex_w, tex_h) = self.primary.texture_dims();
        let rect = self.dirty_rect.union(&self.dual_dirty_rect).clamp_to_bounds(tex_w, tex_h);
        if rect.is_empty() {
            return;
        }
        self.primary.ensure_display(&self.device, &mut self.identities);
        let uniforms = WetEdgeUniforms {
            dirty_offset: [rect.min_x as u32, rect.min_y as u32],
            dirty_size: [rect.width(), rect.height()],
            canvas_size: [tex_w, tex_h],
            hardness: self.config.wet_edge_hardness,
            strength: self.config.wet_edge_strength,
        };
        self.wet_edge_pipeline.dispatch(
            &self.device,
            &self.queue,
            encoder,
            self.primary.dual_blend_output_view().expect("checked above"),
            self.primary.display_view().expect("display ensured"),
            self.primary.dual_blend_output_identity().expect("checked above"),
            self.primary.display_identity().expect("display ensured"),
            uniforms,
        );
    }

    /// The texture a host should present as the live preview (spec §4.5.1):
    /// the wet-edge display texture when that pipeline is active, else the
    /// dual-blend output when a dual brush is active, else the raw
    /// accumulator.
    pub fn presentable_texture(&self) -> &wgpu::Texture {
        if self.config.wet_edge_enabled && self.config.wet_edge_strength > 0.01 {
            if let Some(texture) = self.primary.display_texture() {
                return texture;
            }
        }
        if self.dual_mask_active {
            if let Some(texture) = self.primary.dual_blend_output_texture() {
                return texture;
            }
        }
        self.primary.source_texture()
    }

    fn schedule_preview_readback(&mut self) {
        if self.preview_state == PreviewReadbackState::InFlight {
            self.preview_state = PreviewReadbackState::RetryPending;
            return;
        }
        self.preview_state = PreviewReadbackState::InFlight;
        self.run_preview_readback();
        self.preview_state = PreviewReadbackState::Idle;
    }

    fn run_preview_readback(&mut self) {
        let (tex_w, tex_h) = self.primary.texture_dims();
        let texels = read_rgba16f_texture(&self.device, &self.queue, self.presentable_texture(), tex_w, tex_h);
        let (logical_w, logical_h) = self.primary.logical_dims();
        upscale_nearest_into(&texels, tex_w, tex_h, &mut self.preview_rgba, logical_w, logical_h);
    }

    pub fn get_presentable_texture_dims(&self) -> (u32, u32) {
        self.primary.texture_dims()
    }

    pub fn get_canvas(&self) -> &[u8] {
        &self.preview_rgba
    }

    pub fn get_dimensions(&self) -> (u32, u32) {
        self.primary.logical_dims()
    }

    /// Active -> EndingPrepare -> EndingCommit (spec §4.5 `end_stroke`).
    /// Awaits submitted GPU work, forces one final preview update, and
    /// returns the committed dirty rectangle (in logical canvas space) plus
    /// the composited preview raster for the compositor to write into the
    /// layer.
    pub fn end_stroke(&mut self) -> CommittedStroke {
        if self.state != AccumulatorState::Active {
            return CommittedStroke { dirty_rect: Rect::EMPTY, preview_rgba: Vec::new() };
        }
        self.state = AccumulatorState::EndingPrepare;
        if self.device_lost.load(Ordering::SeqCst) {
            self.state = AccumulatorState::Idle;
            self.trace("end_stroke: device lost, returning empty dirty rect");
            return CommittedStroke { dirty_rect: Rect::EMPTY, preview_rgba: Vec::new() };
        }
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        self.run_preview_readback();

        self.state = AccumulatorState::EndingCommit;
        let logical_rect = self.dirty_rect.scale_outward(1.0 / self.render_scale.max(0.0001));
        let result = CommittedStroke {
            dirty_rect: logical_rect,
            preview_rgba: self.preview_rgba.clone(),
        };
        self.state = AccumulatorState::Idle;
        self.clear();
        self.trace("end_stroke: committed");
        result
    }
}

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// IEEE 754 binary16 -> f32, bit by bit; this lineage's dependency set never
/// decodes half floats through a crate, so the accumulator's own readback is
/// the one place that needs the conversion.
fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 0x1;
    let exponent = (bits >> 10) & 0x1f;
    let mantissa = bits & 0x3ff;

    let value = if exponent == 0 {
        if mantissa == 0 {
            0.0
        } else {
            (mantissa as f32) / 1024.0 * 2f32.powi(-14)
        }
    } else if exponent == 0x1f {
        if mantissa == 0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + (mantissa as f32) / 1024.0) * 2f32.powi(exponent as i32 - 15)
    };

    if sign == 1 {
        -value
    } else {
        value
    }
}

fn linear_unit_to_srgb_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Reads a whole `rgba16float` texture back to a tightly packed host `RGBA8`
/// raster, honoring the 256-byte readback row-stride alignment the way
/// [`crate::texture_cache`]'s sibling in `tiles::store::TileStore::readback_rect`
/// does for its `Rgba8Unorm` tiles, plus the half-to-f32 decode this format
/// needs that the all-u8 tile store never does.
fn read_rgba16f_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; width as usize * height as usize * 4];
    if width == 0 || height == 0 {
        return out;
    }

    let unaligned_bytes_per_row = width * 8; // 4 channels * 2 bytes (f16) each.
    let aligned_bytes_per_row = align_up(unaligned_bytes_per_row, 256);
    let buffer_size = aligned_bytes_per_row as u64 * height as u64;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("accumulator.preview_readback"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("accumulator.preview_readback.copy"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(aligned_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = device.poll(wgpu::PollType::wait_indefinitely());
    receiver
        .recv()
        .expect("map_async channel closed")
        .expect("map_async failed");
    let mapped = slice.get_mapped_range();

    let row_bytes = width as usize * 8;
    let out_stride = width as usize * 4;
    for row in 0..height as usize {
        let src_start = row * aligned_bytes_per_row as usize;
        let src_row = &mapped[src_start..src_start + row_bytes];
        let dst_start = row * out_stride;
        for col in 0..width as usize {
            let texel = &src_row[col * 8..col * 8 + 8];
            let r = f16_bits_to_f32(u16::from_le_bytes([texel[0], texel[1]]));
            let g = f16_bits_to_f32(u16::from_le_bytes([texel[2], texel[3]]));
            let b = f16_bits_to_f32(u16::from_le_bytes([texel[4], texel[5]]));
            let a = f16_bits_to_f32(u16::from_le_bytes([texel[6], texel[7]]));
            let dst = dst_start + col * 4;
            out[dst] = linear_unit_to_srgb_u8(r);
            out[dst + 1] = linear_unit_to_srgb_u8(g);
            out[dst + 2] = linear_unit_to_srgb_u8(b);
            out[dst + 3] = linear_unit_to_srgb_u8(a);
        }
    }
    drop(mapped);
    buffer.unmap();
    out
}

/// Nearest-neighbor upscale from render-scaled texture space into logical
/// canvas space (spec §4.7: the auto render scale is purely an internal
/// accumulation optimization, invisible at the external preview boundary).
fn upscale_nearest_into(src_rgba: &[u8], src_w: u32, src_h: u32, dst: &mut [u8], dst_w: u32, dst_h: u32) {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return;
    }
    for y in 0..dst_h {
        let src_y = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let src_x = (x * src_w / dst_w).min(src_w - 1);
            let src_index = (src_y as usize * src_w as usize + src_x as usize) * 4;
            let dst_index = (y as usize * dst_w as usize + x as usize) * 4;
            dst[dst_index..dst_index + 4].copy_from_slice(&src_rgba[src_index..src_index + 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_device_queue() -> (wgpu::Device, wgpu::Queue) {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .expect("request wgpu adapter");
            let limits = adapter.limits();
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("stroke_accumulator tests"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .expect("request wgpu device")
        })
    }

    fn dab(x: f32, y: f32, size: f32, hardness: f32, opacity: f32) -> GpuDabParams {
        GpuDabParams {
            x,
            y,
            size,
            flow: 1.0,
            hardness,
            color_hex: "#000000".to_owned(),
            dab_opacity: Some(opacity),
            roundness: 1.0,
            angle_degrees: 0.0,
            brush_tip_key: None,
            pattern: None,
            noise_enabled: false,
        }
    }

    #[test]
    fn begin_stroke_activates_and_clear_returns_to_idle() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        assert!(!accumulator.is_active());
        accumulator.begin_stroke();
        assert!(accumulator.is_active());
        accumulator.clear();
        assert!(!accumulator.is_active());
    }

    #[test]
    fn stamp_dab_while_idle_is_ignored() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.stamp_dab(&dab(8.0, 8.0, 4.0, 1.0, 1.0));
        assert!(accumulator.dirty_rect().is_empty());
    }

    #[test]
    fn stamp_dab_expands_dirty_rect_by_effective_radius_and_margin() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.begin_stroke();
        accumulator.stamp_dab(&dab(8.0, 8.0, 8.0, 1.0, 1.0));
        let rect = accumulator.dirty_rect();
        // radius 4, hardness 1 -> effective_radius = 4.4 -> rect (3,3,13,13), +2 texel margin.
        assert_eq!(rect, Rect::new(1, 1, 15, 15));
    }

    #[test]
    fn mode_mismatch_mid_stroke_is_ignored() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.begin_stroke();
        accumulator.stamp_dab(&dab(8.0, 8.0, 4.0, 1.0, 1.0));
        let mut textured = dab(9.0, 9.0, 4.0, 1.0, 1.0);
        textured.brush_tip_key = Some(1);
        accumulator.stamp_dab(&textured);
        assert_eq!(accumulator.mode, Some(BrushMode::Parametric));
    }

    #[test]
    fn auto_flush_threshold_resets_dabs_since_flush() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 64,
            canvas_height: 64,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.begin_stroke();
        for i in 0..64 {
            accumulator.stamp_dab(&dab(8.0 + i as f32 * 0.01, 8.0, 2.0, 1.0, 1.0));
        }
        assert_eq!(accumulator.dabs_since_flush, 0);
    }

    #[test]
    fn end_stroke_on_empty_dirty_rect_returns_empty_rect() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.begin_stroke();
        let committed = accumulator.end_stroke();
        assert!(committed.dirty_rect.is_empty());
        assert!(!accumulator.is_active());
    }

    #[test]
    fn stamp_dab_with_unresident_pattern_requests_fallback() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.begin_stroke();
        let mut with_pattern = dab(8.0, 8.0, 4.0, 1.0, 1.0);
        with_pattern.pattern = Some(PatternSettings {
            pattern_id: 7,
            ..PatternSettings::NONE
        });
        accumulator.stamp_dab(&with_pattern);
        assert_eq!(
            accumulator.consume_fallback_request(),
            Some("pattern 7 is not resident; request a CPU fallback dab".to_owned())
        );
    }

    #[test]
    fn presentable_texture_prefers_dual_blend_over_raw_source_when_wet_edge_off() {
        let (device, queue) = create_device_queue();
        let config = StrokeAccumulatorConfig {
            canvas_width: 16,
            canvas_height: 16,
            wet_edge_enabled: false,
            ..Default::default()
        };
        let mut accumulator = StrokeAccumulator::new(device, queue, config, false);
        accumulator.set_dual_brush_state(true, None);
        accumulator.begin_stroke();
        accumulator.stamp_dab(&dab(8.0, 8.0, 4.0, 1.0, 1.0));
        accumulator.stamp_secondary_dab(8.0, 8.0, 4.0, &DualBrushSettings::default(), 0.0);
        let _ = accumulator.flush();
        let presented = accumulator.presentable_texture();
        let dual_output = accumulator
            .primary
            .dual_blend_output_texture()
            .expect("dual blend pass should have allocated its output slot");
        assert!(std::ptr::eq(presented, dual_output));
    }
}

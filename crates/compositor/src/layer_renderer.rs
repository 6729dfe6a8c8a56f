//! `LayerRenderer`: composites a document's layer stack into a presentable
//! raster, and commits a finished stroke's dirty rect into its target
//! layer's tiles. Generalized from this lineage's `renderer_composite`
//! (full-stack composite) and `renderer_merge` (single-layer commit with
//! load-then-draw-then-copy-back) down to host-raster compositing, since the
//! accumulator's stroke output already reaches this crate as a host `RGBA8`
//! raster (its own preview readback) rather than a GPU texture handle.

use std::collections::HashMap;

use stroke_geom::Rect;
use stroke_protocol::LayerId;
use tiles::{SelectionMaskGpu, TileStore};

use crate::blend_math::{composite_over, u8_to_unit, unit_to_u8};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerEntry {
    pub id: LayerId,
    pub opacity: f32,
    pub blend_mode: stroke_protocol::LayerBlendMode,
    pub visible: bool,
}

/// Caches the composited result of every layer strictly below a given
/// layer, invalidated when that prefix's composition changes (spec §3
/// "Below-active" cache signature, §4.8).
struct BelowCache {
    /// Index (in document order) of the first layer NOT covered by `raster`
    /// -- i.e. `raster` is the composite of layers `[0, covers_up_to)`.
    covers_up_to: usize,
    rect: Rect,
    raster: Vec<u8>,
    /// Per-layer commit counters observed when this cache was built; a
    /// mismatch against the live counters invalidates the cache.
    signatures: Vec<(LayerId, u64)>,
}

pub struct LayerRenderer {
    /// Bumped every time `commit_stroke` touches a layer; used as that
    /// layer's composite signature.
    commit_counters: HashMap<LayerId, u64>,
    below_cache: Option<BelowCache>,
}

impl LayerRenderer {
    pub fn new() -> Self {
        Self {
            commit_counters: HashMap::new(),
            below_cache: None,
        }
    }

    fn signature_of(&self, layer: LayerId) -> u64 {
        self.commit_counters.get(&layer).copied().unwrap_or(0)
    }

    fn current_signatures(&self, layers: &[LayerEntry], up_to: usize) -> Vec<(LayerId, u64)> {
        layers[..up_to].iter().map(|l| (l.id, self.signature_of(l.id))).collect()
    }

    /// Composites every visible layer in `layers` (bottom to top, document
    /// order) over `rect`, clipped by `selection` if present, into a tightly
    /// packed `RGBA8` raster covering exactly `rect`.
    pub fn render_frame(&mut self, store: &TileStore, layers: &[LayerEntry], rect: Rect, selection: Option<&SelectionMaskGpu>) -> Vec<u8> {
        if rect.is_empty() || layers.is_empty() {
            return vec![0u8; (rect.width() as usize * rect.height() as usize * 4).max(0)];
        }
        self.render_layer_stack_frame(store, layers, layers.len(), rect, selection)
    }

    /// Composites layers `[0, active_index)` using (and possibly refreshing)
    /// the below-active cache, then draws layer `active_index` (if any) on
    /// top uncached -- the shape spec §4.8 calls "below-active cache plus
    /// one fresh draw", used while a stroke is in progress on the active
    /// layer so every preview frame doesn't re-walk the whole stack.
    pub fn render_layer_stack_frame(
        &mut self,
        store: &TileStore,
        layers: &[LayerEntry],
        active_index: usize,
        rect: Rect,
        selection: Option<&SelectionMaskGpu>,
    ) -> Vec<u8> {
        let below_count = active_index.min(layers.len());
        let below_raster = self.below_composite(store, layers, below_count, rect);

        let mut out = below_raster;
        if let Some(active) = layers.get(active_index) {
            self.composite_layer_onto(store, active, rect, selection, &mut out);
        }
        out
    }

    fn below_composite(&mut self, store: &TileStore, layers: &[LayerEntry], below_count: usize, rect: Rect) -> Vec<u8> {
        let wanted_signatures = self.current_signatures(layers, below_count);
        if let Some(cache) = &self.below_cache {
            if cache.covers_up_to == below_count && cache.rect == rect && cache.signatures == wanted_signatures {
                return cache.raster.clone();
            }
        }

        let mut raster = vec![0u8; rect.width() as usize * rect.height() as usize * 4];
        for layer in &layers[..below_count] {
            self.composite_layer_onto(store, layer, rect, None, &mut raster);
        }
        self.below_cache = Some(BelowCache {
            covers_up_to: below_count,
            rect,
            raster: raster.clone(),
            signatures: wanted_signatures,
        });
        raster
    }

    fn composite_layer_onto(&self, store: &TileStore, layer: &LayerEntry, rect: Rect, selection: Option<&SelectionMaskGpu>, out: &mut [u8]) {
        if !layer.visible || layer.opacity <= 0.0 {
            return;
        }
        let source = store.readback_rect(layer.id, rect);
        let width = rect.width() as usize;
        let height = rect.height() as usize;
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 4;
                let src = [
                    u8_to_unit(source[idx]),
                    u8_to_unit(source[idx + 1]),
                    u8_to_unit(source[idx + 2]),
                ];
                let src_a = u8_to_unit(source[idx + 3]);
                let clip = selection.map_or(1.0, |mask| u8_to_unit(mask.sample(rect.min_x + x as i32, rect.min_y + y as i32)));
                let base = [
                    u8_to_unit(out[idx]),
                    u8_to_unit(out[idx + 1]),
                    u8_to_unit(out[idx + 2]),
                    u8_to_unit(out[idx + 3]),
                ];
                let blended = composite_over(base, src, src_a, layer.opacity * clip, layer.blend_mode);
                out[idx] = unit_to_u8(blended[0]);
                out[idx + 1] = unit_to_u8(blended[1]);
                out[idx + 2] = unit_to_u8(blended[2]);
                out[idx + 3] = unit_to_u8(blended[3]);
            }
        }
    }

    /// Bumps `layer`'s composite signature without going through
    /// `commit_stroke`, for callers (undo/redo) that write tiles back via
    /// their own snapshot payload and need the below-active cache to treat
    /// that layer as changed on the next `render_frame`/
    /// `render_layer_stack_frame` call.
    pub fn invalidate(&mut self, layer: LayerId) {
        *self.commit_counters.entry(layer).or_insert(0) += 1;
    }

    /// Commits a finished stroke's raster (straight-alpha, `RGBA8`, covering
    /// exactly `rect`) into `layer`'s tiles: reads the tiles currently under
    /// `rect`, alpha-darken-composites the stroke raster on top (clipped by
    /// `selection`), and writes the result back -- the load-then-draw-then
    /// -copy-back idiom this lineage's merge pass uses, minus the GPU
    /// render pass (everything here is host bytes).
    pub fn commit_stroke(&mut self, store: &mut TileStore, layer: LayerId, rect: Rect, stroke_rgba: &[u8], selection: Option<&SelectionMaskGpu>) {
        if rect.is_empty() {
            return;
        }
        let mut composited = store.readback_rect(layer, rect);
        let width = rect.width() as usize;
        let height = rect.height() as usize;
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 4;
                let src = [
                    u8_to_unit(stroke_rgba[idx]),
                    u8_to_unit(stroke_rgba[idx + 1]),
                    u8_to_unit(stroke_rgba[idx + 2]),
                ];
                let src_a = u8_to_unit(stroke_rgba[idx + 3]);
                let clip = selection.map_or(1.0, |mask| u8_to_unit(mask.sample(rect.min_x + x as i32, rect.min_y + y as i32)));
                let base = [
                    u8_to_unit(composited[idx]),
                    u8_to_unit(composited[idx + 1]),
                    u8_to_unit(composited[idx + 2]),
                    u8_to_unit(composited[idx + 3]),
                ];
                let blended = composite_over(base, src, src_a, clip, stroke_protocol::LayerBlendMode::Normal);
                composited[idx] = unit_to_u8(blended[0]);
                composited[idx + 1] = unit_to_u8(blended[1]);
                composited[idx + 2] = unit_to_u8(blended[2]);
                composited[idx + 3] = unit_to_u8(blended[3]);
            }
        }
        let stride = rect.width() * 4;
        let _ = store.upload_rect(layer, rect, &composited, stride);
        *self.commit_counters.entry(layer).or_insert(0) += 1;
    }
}

impl Default for LayerRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stroke_protocol::LayerBlendMode;

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
                    label: Some("compositor tests"),
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

    #[test]
    fn commit_stroke_writes_opaque_pixels_into_empty_tile() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);
        let stroke = vec![255u8, 0, 0, 255].repeat(64);
        let mut renderer = LayerRenderer::new();
        renderer.commit_stroke(&mut store, layer, rect, &stroke, None);
        let back = store.readback_rect(layer, rect);
        assert_eq!(&back[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn commit_stroke_bumps_the_layer_signature() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);
        let stroke = vec![0u8, 0, 0, 0].repeat(64);
        let mut renderer = LayerRenderer::new();
        assert_eq!(renderer.signature_of(layer), 0);
        renderer.commit_stroke(&mut store, layer, rect, &stroke, None);
        assert_eq!(renderer.signature_of(layer), 1);
    }

    #[test]
    fn render_frame_skips_invisible_layers() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);
        let stroke = vec![10u8, 20, 30, 255].repeat(64);
        let mut renderer = LayerRenderer::new();
        renderer.commit_stroke(&mut store, layer, rect, &stroke, None);

        let layers = [LayerEntry {
            id: layer,
            opacity: 1.0,
            blend_mode: LayerBlendMode::Normal,
            visible: false,
        }];
        let out = renderer.render_frame(&store, &layers, rect, None);
        assert_eq!(out, vec![0u8; 8 * 8 * 4]);
    }
}

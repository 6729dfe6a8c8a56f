//! `StrokeEngine`: the single orchestrator facade of spec §6, exclusively
//! owning the accumulator, tile store, layer renderer, and history store --
//! generalized from `glaphica::engine_core::EngineCore`'s shape (one struct
//! owned by one thread, wiring document/atlas/brush stores together) down
//! to a direct synchronous facade, since §5 mandates single-threaded
//! cooperative host scheduling rather than the teacher's multi-thread
//! waterline-feedback model.

use std::time::{Duration, Instant};

use accumulator::{
    CommittedStroke, DecodedRaster, DispatchError, RenderScaleMode, StrokeAccumulator, StrokeAccumulatorConfig,
};
use compositor::{LayerEntry, LayerRenderer};
use history::{ApplyDirection, HistoryEntryId, StrokeHistoryStore};
use stroke_geom::Rect;
use stroke_protocol::{clamp_budget, DualBlendMode, DualBrushSettings, GpuDabParams, LayerId, ResidencyBudgetRecord};
use tiles::{SelectionMaskGpu, TileStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub tile_budget_bytes: u64,
    pub history_budget_bytes: u64,
    pub accumulator: StrokeAccumulatorConfig,
    pub trace_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1,
            canvas_height: 1,
            tile_budget_bytes: clamp_budget(0),
            history_budget_bytes: clamp_budget(0),
            accumulator: StrokeAccumulatorConfig::default(),
            trace_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInitError {
    /// §7 precondition violation: a zero-area canvas can't host any tiles
    /// or accumulator textures.
    EmptyCanvas,
}

impl std::fmt::Display for EngineInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineInitError::EmptyCanvas => write!(f, "canvas width and height must both be nonzero"),
        }
    }
}

impl std::error::Error for EngineInitError {}

/// Running counters surfaced by `get_performance_summary`, reset per
/// stroke where noted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSummary {
    pub dabs_in_current_stroke: u32,
    pub flushes_in_current_stroke: u32,
    pub total_batches_dispatched: u64,
    pub last_end_stroke_duration: Option<Duration>,
    pub resident_tile_bytes: u64,
    pub resident_history_bytes: u64,
}

/// The public orchestrator: owns every collaborator exclusively (spec §3
/// "Ownership"), drives a single in-progress stroke end to end, and commits
/// it into the layer stack with undo/redo snapshots.
pub struct StrokeEngine {
    accumulator: StrokeAccumulator,
    tile_store: TileStore,
    layer_renderer: LayerRenderer,
    history: StrokeHistoryStore,
    layers: Vec<LayerEntry>,
    selection: Option<SelectionMaskGpu>,
    active_layer: Option<LayerId>,
    active_history_entry: Option<HistoryEntryId>,
    next_history_id: u64,
    undo_stack: Vec<HistoryEntryId>,
    redo_stack: Vec<HistoryEntryId>,
    dabs_in_current_stroke: u32,
    flushes_in_current_stroke: u32,
    total_batches_dispatched: u64,
    last_end_stroke_duration: Option<Duration>,
    trace_enabled: bool,
}

impl StrokeEngine {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: EngineConfig) -> Result<Self, EngineInitError> {
        if config.canvas_width == 0 || config.canvas_height == 0 {
            return Err(EngineInitError::EmptyCanvas);
        }
        let accumulator = StrokeAccumulator::new(device.clone(), queue.clone(), config.accumulator, config.trace_enabled);
        let tile_store = TileStore::new(device, queue, clamp_budget(config.tile_budget_bytes));
        Ok(Self {
            accumulator,
            tile_store,
            layer_renderer: LayerRenderer::new(),
            history: StrokeHistoryStore::new(clamp_budget(config.history_budget_bytes)),
            layers: Vec::new(),
            selection: None,
            active_layer: None,
            active_history_entry: None,
            next_history_id: 1,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            dabs_in_current_stroke: 0,
            flushes_in_current_stroke: 0,
            total_batches_dispatched: 0,
            last_end_stroke_duration: None,
            trace_enabled: config.trace_enabled,
        })
    }

    fn trace(&self, message: &str) {
        if self.trace_enabled {
            eprintln!("[stroke_trace] {message}");
        }
    }

    fn alloc_history_id(&mut self) -> HistoryEntryId {
        let id = self.next_history_id;
        self.next_history_id += 1;
        id
    }

    // ---- Document/layer-stack surface ----------------------------------

    pub fn add_layer(&mut self, entry: LayerEntry) {
        self.layers.push(entry);
    }

    pub fn remove_layer(&mut self, layer: LayerId) {
        self.layers.retain(|l| l.id != layer);
        self.tile_store.remove_layer(layer);
    }

    pub fn layers(&self) -> &[LayerEntry] {
        &self.layers
    }

    pub fn set_layer_visible(&mut self, layer: LayerId, visible: bool) {
        if let Some(entry) = self.layers.iter_mut().find(|l| l.id == layer) {
            entry.visible = visible;
        }
    }

    pub fn set_layer_opacity(&mut self, layer: LayerId, opacity: f32) {
        if let Some(entry) = self.layers.iter_mut().find(|l| l.id == layer) {
            entry.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    pub fn set_selection(&mut self, selection: Option<SelectionMaskGpu>) {
        self.selection = selection;
    }

    pub fn render_frame(&mut self, rect: Rect) -> Vec<u8> {
        self.layer_renderer.render_frame(&self.tile_store, &self.layers, rect, self.selection.as_ref())
    }

    // ---- Stroke lifecycle (§6 external interface) -----------------------

    pub fn resize(&mut self, width: u32, height: u32) {
        self.accumulator.resize(width, height);
    }

    pub fn is_active(&self) -> bool {
        self.accumulator.is_active()
    }

    pub fn begin_stroke(&mut self, layer: LayerId) {
        self.accumulator.begin_stroke();
        self.active_layer = Some(layer);
        self.dabs_in_current_stroke = 0;
        self.flushes_in_current_stroke = 0;
        let entry_id = self.alloc_history_id();
        let mode = self.history.begin_stroke(entry_id, layer);
        self.active_history_entry = Some(entry_id);
        self.trace(&format!("begin_stroke: layer={layer:?} history_mode={mode:?}"));
    }

    pub fn abort_stroke(&mut self) {
        self.accumulator.abort_stroke();
        if let Some(entry_id) = self.active_history_entry.take() {
            self.history.discard_active(entry_id);
        }
        self.active_layer = None;
    }

    pub fn clear(&mut self) {
        self.accumulator.clear();
        if let Some(entry_id) = self.active_history_entry.take() {
            self.history.discard_active(entry_id);
        }
        self.active_layer = None;
    }

    pub fn stamp_dab(&mut self, params: &GpuDabParams) {
        self.accumulator.stamp_dab(params);
        self.dabs_in_current_stroke += 1;
    }

    pub fn stamp_secondary_dab(&mut self, x: f32, y: f32, size: f32, settings: &DualBrushSettings, stroke_angle_degrees: f32) {
        self.accumulator.stamp_secondary_dab(x, y, size, settings, stroke_angle_degrees);
    }

    pub fn set_dual_brush_state(&mut self, enabled: bool, blend_mode: Option<DualBlendMode>) {
        self.accumulator.set_dual_brush_state(enabled, blend_mode);
    }

    pub fn set_brush_tip(&mut self, key: u64, raster: &DecodedRaster) {
        self.accumulator.set_brush_tip(key, raster);
    }

    pub fn set_pattern(&mut self, key: u64, raster: &DecodedRaster) {
        self.accumulator.set_pattern(key, raster);
    }

    pub fn consume_fallback_request(&mut self) -> Option<String> {
        self.accumulator.consume_fallback_request()
    }

    pub fn flush(&mut self) -> Result<(), DispatchError> {
        let result = self.accumulator.flush();
        if result.is_ok() {
            self.flushes_in_current_stroke += 1;
            self.total_batches_dispatched += 1;
        }
        result
    }

    /// Ends the active stroke, committing its dirty rect into the active
    /// layer's tiles at `opacity`, and captures before/after undo snapshots
    /// (spec §6 `end_stroke(layer_raster_ctx, opacity) -> Rect`, folding in
    /// the role a separate `CommitCoordinator` would otherwise play --
    /// see DESIGN.md).
    pub fn end_stroke(&mut self, opacity: f32) -> Rect {
        let started = Instant::now();
        let CommittedStroke { dirty_rect, preview_rgba } = self.accumulator.end_stroke();
        let entry_id = self.active_history_entry.take();
        let Some(layer) = self.active_layer.take() else {
            self.last_end_stroke_duration = Some(started.elapsed());
            return dirty_rect;
        };

        if dirty_rect.is_empty() || preview_rgba.is_empty() {
            if let Some(entry_id) = entry_id {
                self.history.discard_active(entry_id);
            }
            self.trace("end_stroke: empty dirty rect, commit skipped");
            self.last_end_stroke_duration = Some(started.elapsed());
            return dirty_rect;
        }

        if let Some(entry_id) = entry_id {
            let _ = self.history.snapshot_before(entry_id, &self.tile_store, dirty_rect);
        }

        let opacity_scaled = scale_alpha(&preview_rgba, opacity);
        self.layer_renderer.commit_stroke(&mut self.tile_store, layer, dirty_rect, &opacity_scaled, self.selection.as_ref());

        if let Some(entry_id) = entry_id {
            let _ = self.history.snapshot_after(entry_id, &self.tile_store);
            if self.history.finalize(entry_id).is_ok() {
                self.undo_stack.push(entry_id);
                self.redo_stack.clear();
                self.history.prune_except(&self.undo_stack);
            }
        }

        self.last_end_stroke_duration = Some(started.elapsed());
        self.trace(&format!("end_stroke: committed layer={layer:?} rect={dirty_rect:?}"));
        dirty_rect
    }

    // ---- Undo/redo --------------------------------------------------

    pub fn undo(&mut self) -> Option<Rect> {
        let entry_id = self.undo_stack.pop()?;
        let layer = self.history.layer_of(entry_id);
        let rect = self.history.apply(entry_id, ApplyDirection::Undo, &mut self.tile_store).ok()?;
        if let Some(layer) = layer {
            self.layer_renderer.invalidate(layer);
        }
        self.redo_stack.push(entry_id);
        Some(rect)
    }

    pub fn redo(&mut self) -> Option<Rect> {
        let entry_id = self.redo_stack.pop()?;
        let layer = self.history.layer_of(entry_id);
        let rect = self.history.apply(entry_id, ApplyDirection::Redo, &mut self.tile_store).ok()?;
        if let Some(layer) = layer {
            self.layer_renderer.invalidate(layer);
        }
        self.undo_stack.push(entry_id);
        Some(rect)
    }

    // ---- Introspection --------------------------------------------------

    pub fn get_canvas(&self) -> &[u8] {
        self.accumulator.get_canvas()
    }

    pub fn get_dirty_rect(&self) -> Rect {
        self.accumulator.dirty_rect()
    }

    pub fn get_dimensions(&self) -> (u32, u32) {
        self.accumulator.get_dimensions()
    }

    pub fn get_presentable_texture(&self) -> &wgpu::Texture {
        self.accumulator.presentable_texture()
    }

    pub fn is_device_lost(&self) -> bool {
        self.accumulator.is_device_lost()
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            dabs_in_current_stroke: self.dabs_in_current_stroke,
            flushes_in_current_stroke: self.flushes_in_current_stroke,
            total_batches_dispatched: self.total_batches_dispatched,
            last_end_stroke_duration: self.last_end_stroke_duration,
            resident_tile_bytes: self.tile_store.resident_bytes(),
            resident_history_bytes: self.history.resident_bytes(),
        }
    }

    /// Returns the current tile-residency usage as a persistable budget
    /// record (spec §6 "Persisted residency budget"), clamped to
    /// `[256 MiB, 5 GiB]`.
    pub fn residency_budget_record(&self, max_allocation_bytes: u64, ratio: f32, sampled_at_ms: u64) -> ResidencyBudgetRecord {
        ResidencyBudgetRecord::from_sample(max_allocation_bytes, ratio, sampled_at_ms)
    }

    /// Applies a previously persisted residency budget record, re-clamping
    /// it in case it was written under a different policy.
    pub fn apply_residency_budget_record(&mut self, record: &ResidencyBudgetRecord) {
        let budget = clamp_budget(record.budget_bytes);
        self.tile_store.set_budget_bytes(budget);
    }

    /// Explicit shutdown (redesign flag §9: no process-wide singleton, an
    /// owned value with an explicit teardown instead of a static `instance`
    /// reset via `None`). Consumes `self`; every collaborator's GPU
    /// resources are freed as this value's fields drop.
    pub fn destroy(self) {}
}

/// Scales a tightly packed `RGBA8` raster's alpha channel by `opacity`,
/// leaving color untouched -- the straight-alpha opacity the commit path
/// applies before alpha-darken compositing.
fn scale_alpha(rgba: &[u8], opacity: f32) -> Vec<u8> {
    let opacity = opacity.clamp(0.0, 1.0);
    let mut out = rgba.to_vec();
    for pixel in out.chunks_exact_mut(4) {
        pixel[3] = ((pixel[3] as f32) * opacity).round().clamp(0.0, 255.0) as u8;
    }
    out
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
                    label: Some("engine tests"),
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

    fn test_config() -> EngineConfig {
        EngineConfig {
            canvas_width: 64,
            canvas_height: 64,
            tile_budget_bytes: 64 * 1024 * 1024,
            history_budget_bytes: 64 * 1024 * 1024,
            accumulator: StrokeAccumulatorConfig {
                canvas_width: 64,
                canvas_height: 64,
                render_scale_mode: RenderScaleMode::Off,
                ..StrokeAccumulatorConfig::default()
            },
            trace_enabled: false,
        }
    }

    fn dab(x: f32, y: f32, size: f32, hardness: f32) -> GpuDabParams {
        GpuDabParams {
            x,
            y,
            size,
            flow: 1.0,
            hardness,
            color_hex: "#ff0000".to_owned(),
            dab_opacity: None,
            roundness: 1.0,
            angle_degrees: 0.0,
            brush_tip_key: None,
            pattern: None,
            noise_enabled: false,
        }
    }

    #[test]
    fn empty_canvas_is_rejected_at_construction() {
        let (device, queue) = create_device_queue();
        let mut config = test_config();
        config.canvas_width = 0;
        let result = StrokeEngine::new(device, queue, config);
        assert!(matches!(result, Err(EngineInitError::EmptyCanvas)));
    }

    #[test]
    fn single_opaque_dab_commits_into_the_layer() {
        let (device, queue) = create_device_queue();
        let mut engine = StrokeEngine::new(device, queue, test_config()).unwrap();
        let layer = LayerId::default();
        engine.add_layer(LayerEntry { id: layer, opacity: 1.0, blend_mode: LayerBlendMode::Normal, visible: true });

        engine.begin_stroke(layer);
        engine.stamp_dab(&dab(32.0, 32.0, 10.0, 1.0));
        engine.flush().unwrap();
        let rect = engine.end_stroke(1.0);
        assert!(!rect.is_empty());

        let frame = engine.render_frame(rect);
        let center = (rect.height() as usize / 2) * rect.width() as usize + rect.width() as usize / 2;
        assert!(frame[center * 4 + 3] > 0);
    }

    #[test]
    fn undo_after_commit_restores_the_empty_layer() {
        let (device, queue) = create_device_queue();
        let mut engine = StrokeEngine::new(device, queue, test_config()).unwrap();
        let layer = LayerId::default();
        engine.add_layer(LayerEntry { id: layer, opacity: 1.0, blend_mode: LayerBlendMode::Normal, visible: true });

        engine.begin_stroke(layer);
        engine.stamp_dab(&dab(32.0, 32.0, 10.0, 1.0));
        engine.flush().unwrap();
        let rect = engine.end_stroke(1.0);

        let before_undo = engine.render_frame(rect);
        assert!(before_undo.iter().any(|&b| b != 0));

        engine.undo();
        let after_undo = engine.render_frame(rect);
        assert!(after_undo.iter().all(|&b| b == 0));
    }

    #[test]
    fn abort_stroke_leaves_no_history_entry_to_undo() {
        let (device, queue) = create_device_queue();
        let mut engine = StrokeEngine::new(device, queue, test_config()).unwrap();
        let layer = LayerId::default();
        engine.add_layer(LayerEntry { id: layer, opacity: 1.0, blend_mode: LayerBlendMode::Normal, visible: true });

        engine.begin_stroke(layer);
        engine.stamp_dab(&dab(32.0, 32.0, 10.0, 1.0));
        engine.abort_stroke();
        assert!(engine.undo().is_none());
    }

    #[test]
    fn performance_summary_counts_dabs_and_flushes() {
        let (device, queue) = create_device_queue();
        let mut engine = StrokeEngine::new(device, queue, test_config()).unwrap();
        let layer = LayerId::default();
        engine.begin_stroke(layer);
        engine.stamp_dab(&dab(10.0, 10.0, 5.0, 1.0));
        engine.stamp_dab(&dab(12.0, 10.0, 5.0, 1.0));
        engine.flush().unwrap();
        let summary = engine.get_performance_summary();
        assert_eq!(summary.dabs_in_current_stroke, 2);
        assert_eq!(summary.flushes_in_current_stroke, 1);
    }
}

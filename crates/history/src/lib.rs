//! `StrokeHistoryStore`: per-stroke before/after tile snapshots for undo and
//! redo, byte-budgeted via [`residency::ResidencyManager`], generalized from
//! this lineage's tile-slot eviction accounting
//! (`tiles::atlas::core`/`tiles::lifecycle`) down to the flat per-entry
//! snapshot map spec §3 "History stroke entry" and §4.9 describe.

use std::collections::HashMap;

use residency::ResidencyManager;
use stroke_geom::{rect_to_tile_coords, tile_rect, Rect, TileCoord};
use stroke_protocol::LayerId;
use tiles::{TileStore, TILE_SIZE};

/// Identifies one stroke's history entry. Callers (the engine) mint these,
/// typically a monotonic counter.
pub type HistoryEntryId = u64;

/// Whether a stroke's snapshots are resident on the GPU (normal case) or the
/// store asked the caller to keep them on the CPU because the budget is
/// already exhausted (spec §4.9: "if the store's used bytes exceed the
/// budget, mode cpu is returned").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDirection {
    Undo,
    Redo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryError {
    UnknownEntry,
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::UnknownEntry => write!(f, "no history entry with that id"),
        }
    }
}

impl std::error::Error for HistoryError {}

struct TileSnapshot {
    before: Vec<u8>,
    after: Vec<u8>,
}

fn tile_snapshot_bytes() -> u64 {
    u64::from(TILE_SIZE) * u64::from(TILE_SIZE) * 4 * 2
}

/// A stroke entry while its commit is still in progress: "before" snapshots
/// are captured as tiles are first touched, "after" snapshots once the
/// commit finishes and `finalize` is called.
struct ActiveEntry {
    layer: LayerId,
    tiles: HashMap<TileCoord, TileSnapshot>,
}

/// A finalized, applicable entry. Its payload lives here; `residency` only
/// tracks the byte budget and eviction order by entry id, the same split
/// `tiles::TileStore` uses between its `layers` map and its
/// `ResidencyManager<TileSlotKey, ()>`.
struct CommittedEntry {
    layer: LayerId,
    tiles: HashMap<TileCoord, TileSnapshot>,
}

pub struct StrokeHistoryStore {
    active: HashMap<HistoryEntryId, ActiveEntry>,
    committed: HashMap<HistoryEntryId, CommittedEntry>,
    residency: ResidencyManager<HistoryEntryId, ()>,
}

impl StrokeHistoryStore {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            active: HashMap::new(),
            committed: HashMap::new(),
            residency: ResidencyManager::new(budget_bytes),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.residency.budget_bytes()
    }

    pub fn set_budget_bytes(&mut self, budget_bytes: u64) {
        self.residency.set_budget_bytes(budget_bytes);
        self.evict_over_budget();
    }

    pub fn resident_bytes(&self) -> u64 {
        self.residency.resident_bytes()
    }

    pub fn contains(&self, entry_id: HistoryEntryId) -> bool {
        self.committed.contains_key(&entry_id)
    }

    /// The target layer of a committed entry, for callers (undo/redo) that
    /// need to know which layer's composite cache to invalidate after
    /// `apply` writes tiles back outside the normal commit path.
    pub fn layer_of(&self, entry_id: HistoryEntryId) -> Option<LayerId> {
        self.committed.get(&entry_id).map(|entry| entry.layer)
    }

    fn evict_over_budget(&mut self) {
        for evicted in self.residency.evict_to_budget() {
            self.committed.remove(&evicted.key);
        }
    }

    /// Opens a new active entry for a stroke about to commit into `layer`.
    /// Returns `HistoryMode::Cpu` when the store is already at or over
    /// budget, so the caller can fall back to keeping its own CPU-side
    /// snapshots instead of relying on this store's residency.
    pub fn begin_stroke(&mut self, entry_id: HistoryEntryId, layer: LayerId) -> HistoryMode {
        self.active.insert(entry_id, ActiveEntry { layer, tiles: HashMap::new() });
        if self.residency.resident_bytes() >= self.residency.budget_bytes() {
            HistoryMode::Cpu
        } else {
            HistoryMode::Gpu
        }
    }

    /// Records the "before" state of every tile under `rect`, read from
    /// `store` prior to the commit writing over it. Idempotent per tile: a
    /// tile already snapshotted this stroke keeps its original "before".
    pub fn snapshot_before(&mut self, entry_id: HistoryEntryId, store: &TileStore, rect: Rect) -> Result<(), HistoryError> {
        let entry = self.active.get_mut(&entry_id).ok_or(HistoryError::UnknownEntry)?;
        if rect.is_empty() {
            return Ok(());
        }
        for coord in rect_to_tile_coords(&rect, TILE_SIZE) {
            if entry.tiles.contains_key(&coord) {
                continue;
            }
            let bounds = tile_rect(coord, TILE_SIZE);
            let before = store.readback_rect(entry.layer, bounds);
            entry.tiles.insert(coord, TileSnapshot { before, after: Vec::new() });
        }
        Ok(())
    }

    /// Records the "after" state of every tile previously snapshotted by
    /// [`Self::snapshot_before`] for this entry, read from `store` once the
    /// commit has written its pixels.
    pub fn snapshot_after(&mut self, entry_id: HistoryEntryId, store: &TileStore) -> Result<(), HistoryError> {
        let entry = self.active.get_mut(&entry_id).ok_or(HistoryError::UnknownEntry)?;
        for (coord, snapshot) in entry.tiles.iter_mut() {
            let bounds = tile_rect(*coord, TILE_SIZE);
            snapshot.after = store.readback_rect(entry.layer, bounds);
        }
        Ok(())
    }

    /// Promotes the active entry to a committed, applicable entry (spec
    /// §4.9 "finalize promotes the active entry to a committed entry"),
    /// making room under budget first by evicting the oldest committed
    /// entries.
    pub fn finalize(&mut self, entry_id: HistoryEntryId) -> Result<(), HistoryError> {
        let entry = self.active.remove(&entry_id).ok_or(HistoryError::UnknownEntry)?;
        let bytes = tile_snapshot_bytes() * entry.tiles.len() as u64;
        self.committed.insert(
            entry_id,
            CommittedEntry {
                layer: entry.layer,
                tiles: entry.tiles,
            },
        );
        if let Some(evicted) = self.residency.insert(entry_id, (), bytes) {
            self.committed.remove(&evicted.key);
        }
        self.evict_over_budget();
        Ok(())
    }

    /// Discards an active entry without finalizing it, e.g. an aborted
    /// stroke that never produced a committed change.
    pub fn discard_active(&mut self, entry_id: HistoryEntryId) {
        self.active.remove(&entry_id);
    }

    /// Writes `entry_id`'s before- (undo) or after- (redo) snapshots back
    /// into `store`, returning the union of every touched tile's rect so
    /// the caller can re-composite that region.
    pub fn apply(&mut self, entry_id: HistoryEntryId, direction: ApplyDirection, store: &mut TileStore) -> Result<Rect, HistoryError> {
        self.residency.touch(&entry_id);
        let entry = self.committed.get(&entry_id).ok_or(HistoryError::UnknownEntry)?;
        let layer = entry.layer;
        let mut touched = Rect::EMPTY;
        let writes: Vec<(Rect, &[u8])> = entry
            .tiles
            .iter()
            .map(|(coord, snapshot)| {
                let bounds = tile_rect(*coord, TILE_SIZE);
                let payload: &[u8] = match direction {
                    ApplyDirection::Undo => &snapshot.before,
                    ApplyDirection::Redo => &snapshot.after,
                };
                (bounds, payload)
            })
            .collect();
        for (bounds, payload) in writes {
            touched = touched.union(&bounds);
            let _ = store.upload_rect(layer, bounds, payload, bounds.width() * 4);
        }
        Ok(touched)
    }

    /// Destroys every committed entry not listed in `keep`, reclaiming
    /// their bytes (spec §4.9 "prune_except destroys all non-listed
    /// entries"), e.g. when a redo tail is discarded by a fresh stroke.
    pub fn prune_except(&mut self, keep: &[HistoryEntryId]) {
        let doomed: Vec<HistoryEntryId> = self.committed.keys().filter(|id| !keep.contains(id)).copied().collect();
        for id in doomed {
            self.committed.remove(&id);
            self.residency.remove(&id);
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
                    label: Some("history tests"),
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
    fn begin_stroke_reports_gpu_mode_under_budget() {
        let mut history = StrokeHistoryStore::new(64 * 1024 * 1024);
        let mode = history.begin_stroke(1, LayerId::default());
        assert_eq!(mode, HistoryMode::Gpu);
    }

    #[test]
    fn begin_stroke_reports_cpu_mode_once_budget_is_exhausted() {
        let mut history = StrokeHistoryStore::new(0);
        let mode = history.begin_stroke(1, LayerId::default());
        assert_eq!(mode, HistoryMode::Cpu);
    }

    #[test]
    fn undo_after_commit_restores_the_pre_commit_pixels() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);

        // pre-existing content before the stroke.
        let original = vec![10u8, 20, 30, 255].repeat(64);
        store.upload_rect(layer, rect, &original, rect.width() * 4).unwrap();

        let mut history = StrokeHistoryStore::new(64 * 1024 * 1024);
        history.begin_stroke(1, layer);
        history.snapshot_before(1, &store, rect).unwrap();

        let stroke = vec![200u8, 0, 0, 255].repeat(64);
        store.upload_rect(layer, rect, &stroke, rect.width() * 4).unwrap();
        history.snapshot_after(1, &store).unwrap();
        history.finalize(1).unwrap();

        assert_eq!(&store.readback_rect(layer, rect)[0..4], &[200, 0, 0, 255]);
        history.apply(1, ApplyDirection::Undo, &mut store).unwrap();
        assert_eq!(&store.readback_rect(layer, rect)[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn redo_after_undo_reapplies_the_committed_pixels() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);

        let mut history = StrokeHistoryStore::new(64 * 1024 * 1024);
        history.begin_stroke(1, layer);
        history.snapshot_before(1, &store, rect).unwrap();
        let stroke = vec![0u8, 255, 0, 255].repeat(64);
        store.upload_rect(layer, rect, &stroke, rect.width() * 4).unwrap();
        history.snapshot_after(1, &store).unwrap();
        history.finalize(1).unwrap();

        history.apply(1, ApplyDirection::Undo, &mut store).unwrap();
        history.apply(1, ApplyDirection::Redo, &mut store).unwrap();
        assert_eq!(&store.readback_rect(layer, rect)[0..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn prune_except_drops_unlisted_entries_and_reclaims_bytes() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);

        let mut history = StrokeHistoryStore::new(64 * 1024 * 1024);
        for id in [1u64, 2u64] {
            history.begin_stroke(id, layer);
            history.snapshot_before(id, &store, rect).unwrap();
            history.snapshot_after(id, &store).unwrap();
            history.finalize(id).unwrap();
        }
        assert!(history.contains(1));
        assert!(history.contains(2));

        history.prune_except(&[2]);
        assert!(!history.contains(1));
        assert!(history.contains(2));
        assert!(history.resident_bytes() > 0);
    }

    #[test]
    fn finalize_evicts_oldest_entries_once_over_budget() {
        let (device, queue) = create_device_queue();
        let mut store = TileStore::new(device, queue, 64 * 1024 * 1024);
        let layer = LayerId::default();
        let rect = Rect::new(0, 0, 8, 8);

        let one_tile_bytes = tile_snapshot_bytes();
        let mut history = StrokeHistoryStore::new(one_tile_bytes);
        for id in [1u64, 2u64] {
            history.begin_stroke(id, layer);
            history.snapshot_before(id, &store, rect).unwrap();
            history.snapshot_after(id, &store).unwrap();
            history.finalize(id).unwrap();
        }
        assert!(!history.contains(1));
        assert!(history.contains(2));
    }
}
